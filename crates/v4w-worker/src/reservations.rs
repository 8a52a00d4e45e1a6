//! In-process output path reservations.
//!
//! Two jobs planned at the same moment for inputs with the same base name
//! would otherwise both see a destination as free. Planning through
//! [`PathReservations`] treats reserved paths as taken until the owning job
//! releases them.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use v4w_media::OutputPlan;
use v4w_models::Encoding;

#[derive(Debug, Clone, Default)]
pub struct PathReservations {
    reserved: Arc<Mutex<HashSet<PathBuf>>>,
}

impl PathReservations {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve and reserve destinations for `input`.
    ///
    /// Resolution checks the filesystem, so it runs against a snapshot of
    /// the reserved set with the lock released. The result is reserved only
    /// if none of its paths were taken in the meantime; otherwise it is
    /// resolved again.
    pub fn plan(&self, input: &Path, encodings: &[Encoding]) -> OutputPlan {
        loop {
            let snapshot = self.reserved.lock().clone();
            let plan = OutputPlan::resolve_avoiding(input, encodings, |path| snapshot.contains(path));
            let destinations = plan.destinations();

            let mut reserved = self.reserved.lock();
            if destinations.iter().all(|path| !reserved.contains(path)) {
                reserved.extend(destinations);
                return plan;
            }
        }
    }

    /// Release paths reserved by a finished job.
    pub fn release(&self, paths: &[PathBuf]) {
        let mut reserved = self.reserved.lock();
        for path in paths {
            reserved.remove(path);
        }
    }

    pub fn is_reserved(&self, path: &Path) -> bool {
        self.reserved.lock().contains(path)
    }

    pub fn len(&self) -> usize {
        self.reserved.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.reserved.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_plan_reserves_and_release_frees() {
        let dir = TempDir::new().unwrap();
        let reservations = PathReservations::new();
        let plan = reservations.plan(&dir.path().join("clip.mp4"), &Encoding::ALL);

        assert_eq!(reservations.len(), 2);
        for dest in plan.destinations() {
            assert!(reservations.is_reserved(&dest));
        }

        reservations.release(&plan.destinations());
        assert!(reservations.is_empty());
    }

    #[test]
    fn test_concurrent_plans_never_collide() {
        let dir = TempDir::new().unwrap();
        let reservations = PathReservations::new();
        let input = dir.path().join("clip.mov");

        let mut seen = HashSet::new();
        for _ in 0..20 {
            for dest in reservations.plan(&input, &Encoding::ALL).destinations() {
                assert!(seen.insert(dest));
            }
        }
        assert_eq!(reservations.len(), 40);
    }

    #[test]
    fn test_plans_from_many_threads_stay_distinct() {
        let dir = TempDir::new().unwrap();
        let reservations = PathReservations::new();
        let input = dir.path().join("clip.webm");

        let plans: Vec<Vec<PathBuf>> = std::thread::scope(|scope| {
            let workers: Vec<_> = (0..8)
                .map(|_| {
                    scope.spawn(|| {
                        (0..10)
                            .flat_map(|_| reservations.plan(&input, &Encoding::ALL).destinations())
                            .collect::<Vec<_>>()
                    })
                })
                .collect();
            workers.into_iter().map(|w| w.join().unwrap()).collect()
        });

        let unique: HashSet<PathBuf> = plans.into_iter().flatten().collect();
        assert_eq!(unique.len(), 160);
        assert_eq!(reservations.len(), 160);
    }
}
