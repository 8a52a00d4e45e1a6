//! Output path planning.
//!
//! Outputs are written next to the input as
//! `<stem without "_optimized">_optimized_<tag>.<ext>`, where `tag` is eight
//! random hex characters shared by every output of one plan. A taken
//! candidate gets a `-2`, `-3`, ... suffix until a free name is found.
//!
//! Paths are free at resolution time only; a file created by someone else
//! between planning and spawning is not detected here.

use std::path::{Path, PathBuf};

use uuid::Uuid;
use v4w_models::Encoding;

/// Marker appended to output stems.
pub const OPTIMIZED_SUFFIX: &str = "_optimized";

/// First counter tried when a candidate path is taken.
const FIRST_COUNTER: u32 = 2;

/// One planned output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedOutput {
    pub encoding: Encoding,
    pub destination: PathBuf,
}

/// Resolved destinations for a job's enabled encodings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutputPlan {
    outputs: Vec<PlannedOutput>,
}

impl OutputPlan {
    /// Resolve destinations against the filesystem with a fresh random tag.
    pub fn resolve(input: &Path, encodings: &[Encoding]) -> Self {
        Self::resolve_avoiding(input, encodings, |_| false)
    }

    /// Like [`OutputPlan::resolve`], also skipping paths `is_reserved` claims.
    pub fn resolve_avoiding<F>(input: &Path, encodings: &[Encoding], is_reserved: F) -> Self
    where
        F: Fn(&Path) -> bool,
    {
        Self::resolve_with(input, encodings, &random_tag(), |path| {
            is_reserved(path) || path.exists()
        })
    }

    /// Resolve destinations with an explicit tag and "is taken" predicate.
    ///
    /// Duplicate encodings are planned once, keeping the first occurrence.
    pub fn resolve_with<F>(input: &Path, encodings: &[Encoding], tag: &str, is_taken: F) -> Self
    where
        F: Fn(&Path) -> bool,
    {
        let directory = input.parent().unwrap_or_else(|| Path::new(""));
        let base_name = output_base_name(input, tag);

        let mut outputs: Vec<PlannedOutput> = Vec::with_capacity(encodings.len());
        for &encoding in encodings {
            if outputs.iter().any(|o| o.encoding == encoding) {
                continue;
            }
            let destination =
                unique_output_path(directory, &base_name, encoding.extension(), &is_taken);
            outputs.push(PlannedOutput {
                encoding,
                destination,
            });
        }

        Self { outputs }
    }

    pub fn outputs(&self) -> &[PlannedOutput] {
        &self.outputs
    }

    pub fn destinations(&self) -> Vec<PathBuf> {
        self.outputs.iter().map(|o| o.destination.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.outputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outputs.is_empty()
    }
}

/// Build the shared output stem for an input.
pub fn output_base_name(input: &Path, tag: &str) -> String {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let stem = stem.replace(OPTIMIZED_SUFFIX, "");
    format!("{}{}_{}", stem, OPTIMIZED_SUFFIX, tag)
}

/// First of `<base>.<ext>`, `<base>-2.<ext>`, `<base>-3.<ext>`, ... not taken.
pub fn unique_output_path<F>(directory: &Path, base_name: &str, extension: &str, is_taken: F) -> PathBuf
where
    F: Fn(&Path) -> bool,
{
    let mut candidate = directory.join(format!("{}.{}", base_name, extension));
    let mut counter = FIRST_COUNTER;
    while is_taken(&candidate) {
        candidate = directory.join(format!("{}-{}.{}", base_name, counter, extension));
        counter += 1;
    }
    candidate
}

fn random_tag() -> String {
    let mut tag = Uuid::new_v4().simple().to_string();
    tag.truncate(8);
    tag
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use tempfile::TempDir;

    #[test]
    fn test_base_name_strips_previous_marker() {
        assert_eq!(
            output_base_name(Path::new("/v/holiday.mov"), "abcd1234"),
            "holiday_optimized_abcd1234"
        );
        assert_eq!(
            output_base_name(Path::new("/v/holiday_optimized_0000.mp4"), "abcd1234"),
            "holiday_0000_optimized_abcd1234"
        );
    }

    #[test]
    fn test_plan_order_and_extensions() {
        let plan = OutputPlan::resolve_with(
            Path::new("/videos/clip.mkv"),
            &[Encoding::Mp4, Encoding::Webm],
            "t",
            |_| false,
        );
        assert_eq!(plan.len(), 2);
        assert_eq!(plan.outputs()[0].encoding, Encoding::Mp4);
        assert_eq!(
            plan.outputs()[0].destination,
            PathBuf::from("/videos/clip_optimized_t.mp4")
        );
        assert_eq!(
            plan.outputs()[1].destination,
            PathBuf::from("/videos/clip_optimized_t.webm")
        );
    }

    #[test]
    fn test_duplicate_encodings_planned_once() {
        let plan = OutputPlan::resolve_with(
            Path::new("clip.mp4"),
            &[Encoding::Webm, Encoding::Webm],
            "t",
            |_| false,
        );
        assert_eq!(plan.len(), 1);
        assert_eq!(plan.outputs()[0].destination, PathBuf::from("clip_optimized_t.webm"));
    }

    #[test]
    fn test_empty_encodings_give_empty_plan() {
        let plan = OutputPlan::resolve(Path::new("/tmp/clip.mp4"), &[]);
        assert!(plan.is_empty());
    }

    #[test]
    fn test_existing_files_are_skipped() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("clip.mp4");
        std::fs::write(dir.path().join("clip_optimized_tag.mp4"), b"x").unwrap();
        std::fs::write(dir.path().join("clip_optimized_tag-2.mp4"), b"x").unwrap();

        let plan = OutputPlan::resolve_with(&input, &[Encoding::Mp4, Encoding::Webm], "tag", |p| {
            p.exists()
        });

        assert_eq!(
            plan.outputs()[0].destination,
            dir.path().join("clip_optimized_tag-3.mp4")
        );
        assert_eq!(
            plan.outputs()[1].destination,
            dir.path().join("clip_optimized_tag.webm")
        );
        for dest in plan.destinations() {
            assert!(!dest.exists());
        }
    }

    #[test]
    fn test_same_base_name_inputs_get_distinct_paths() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("clip.mp4");

        let first = OutputPlan::resolve(&input, &Encoding::ALL);
        let second = OutputPlan::resolve(&input, &Encoding::ALL);

        let a: HashSet<_> = first.destinations().into_iter().collect();
        let b: HashSet<_> = second.destinations().into_iter().collect();
        assert!(a.is_disjoint(&b));
    }

    #[test]
    fn test_same_tag_with_reservation_predicate() {
        let taken: std::cell::RefCell<HashSet<PathBuf>> = Default::default();
        let input = Path::new("/v/clip.mp4");

        let first = OutputPlan::resolve_with(input, &[Encoding::Mp4], "same", |p| {
            taken.borrow().contains(p)
        });
        taken.borrow_mut().extend(first.destinations());
        let second = OutputPlan::resolve_with(input, &[Encoding::Mp4], "same", |p| {
            taken.borrow().contains(p)
        });

        assert_eq!(first.outputs()[0].destination, PathBuf::from("/v/clip_optimized_same.mp4"));
        assert_eq!(
            second.outputs()[0].destination,
            PathBuf::from("/v/clip_optimized_same-2.mp4")
        );
    }
}
