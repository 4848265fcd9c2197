use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use rayon::prelude::*;

use crate::audio::{decode_file, is_recognized};
use crate::config::FingerprintConfig;
use crate::error::{IngestError, StoreError};
use crate::matcher::fingerprint;
use crate::store::IndexStore;

/// Per-track payload handed from a fingerprinting worker to the writer
/// thread.
struct Job {
    track_id: String,
    label: String,
    postings: Vec<(u64, u32)>,
}

/// Outcome of one `ingest_directory` run.
#[derive(Debug, Default)]
pub struct IngestStats {
    pub processed: usize,
    pub skipped: usize,
    pub errors: Vec<IngestError>,
}

/// Default worker count: one OS thread per available core, since the work
/// is CPU-bound (FFT, peak filtering, hashing) rather than I/O-bound.
pub fn default_worker_count() -> usize {
    num_cpus::get().max(1)
}

/// Recursively find files under `root` with a recognized extension.
fn discover_files(root: &Path) -> Vec<PathBuf> {
    let mut out = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let entries = match std::fs::read_dir(&dir) {
            Ok(e) => e,
            Err(e) => {
                log::warn!("could not read directory {}: {e}", dir.display());
                continue;
            }
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
            } else if is_recognized(&path) {
                out.push(path);
            }
        }
    }
    out.sort();
    out
}

/// Derive the stable track id (base name without extension) and the
/// display label (full base name) from a file path.
fn track_identity(path: &Path) -> (String, String) {
    let label = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let track_id = path
        .file_stem()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| label.clone());
    (track_id, label)
}

/// Scan `root` for recognized audio files and ingest them into the index at
/// `db_path`, using `workers` OS threads for fingerprinting and a single
/// writer thread funneling postings through a bounded channel. A per-file
/// failure is logged and skipped; it never aborts the run,
/// and no partial postings from a failed file are committed.
pub fn ingest_directory(
    root: &Path,
    db_path: &Path,
    cfg: &FingerprintConfig,
    workers: usize,
) -> Result<IngestStats, StoreError> {
    {
        let store = IndexStore::open(db_path)?;
        store.record_build_config(cfg)?;
    }

    let files = discover_files(root);
    log::info!("found {} audio file(s) under {}", files.len(), root.display());

    let queue_capacity = (2 * workers).max(2);
    let (sender, receiver) = crossbeam_channel::bounded::<Job>(queue_capacity);

    let processed = Arc::new(AtomicUsize::new(0));
    let writer_errors: Arc<Mutex<Vec<IngestError>>> = Arc::new(Mutex::new(Vec::new()));

    let writer_handle = {
        let processed = Arc::clone(&processed);
        let writer_errors = Arc::clone(&writer_errors);
        let db_path = db_path.to_path_buf();
        thread::spawn(move || -> Result<(), StoreError> {
            let mut store = IndexStore::open(&db_path)?;
            for job in receiver {
                match store.append_postings(&job.track_id, &job.label, &job.postings, false) {
                    Ok(()) => {
                        processed.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(e) => {
                        log::warn!("failed to commit postings for {}: {e}", job.track_id);
                        writer_errors.lock().unwrap().push(IngestError::Store {
                            path: PathBuf::from(job.label),
                            source: e,
                        });
                    }
                }
            }
            Ok(())
        })
    };

    let worker_errors: Mutex<Vec<IngestError>> = Mutex::new(Vec::new());
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers.max(1))
        .build()
        .map_err(|e| StoreError::Unavailable(e.to_string()))?;

    pool.install(|| {
        files.par_iter().for_each(|path| {
            let sender = sender.clone();
            match decode_file(path).and_then(|decoded| {
                fingerprint(&decoded.samples, decoded.sample_rate, cfg)
            }) {
                Ok(postings) => {
                    let (track_id, label) = track_identity(path);
                    if sender
                        .send(Job {
                            track_id,
                            label,
                            postings,
                        })
                        .is_err()
                    {
                        log::error!("writer thread gone, dropping {}", path.display());
                    }
                }
                Err(e) => {
                    log::warn!("skipping {}: {e}", path.display());
                    worker_errors.lock().unwrap().push(IngestError::Audio {
                        path: path.clone(),
                        source: e,
                    });
                }
            }
        });
    });

    drop(sender);
    writer_handle
        .join()
        .map_err(|_| StoreError::Unavailable("writer thread panicked".into()))??;

    let mut errors = worker_errors.into_inner().unwrap();
    errors.extend(Arc::try_unwrap(writer_errors).unwrap().into_inner().unwrap());

    let processed = processed.load(Ordering::Relaxed);
    Ok(IngestStats {
        processed,
        skipped: errors.len(),
        errors,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn track_identity_strips_extension() {
        let (id, label) = track_identity(Path::new("/music/chirp_30.wav"));
        assert_eq!(id, "chirp_30");
        assert_eq!(label, "chirp_30.wav");
    }

    #[test]
    fn discover_files_finds_recognized_extensions_recursively() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.wav"), b"x").unwrap();
        std::fs::write(dir.path().join("ignore.txt"), b"x").unwrap();
        let sub = dir.path().join("sub");
        std::fs::create_dir(&sub).unwrap();
        std::fs::write(sub.join("b.mp3"), b"x").unwrap();

        let found = discover_files(dir.path());
        assert_eq!(found.len(), 2);
    }
}
