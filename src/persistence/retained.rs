// src/persistence/retained.rs
//
// Start-up report of clips left in the clip directory by earlier jobs that
// failed. Nothing is retried here.

use std::path::{Path, PathBuf};
use tracing::{info, warn};
use walkdir::WalkDir;

pub fn scan_retained_clips(clip_dir: &Path) -> Vec<PathBuf> {
    if !clip_dir.exists() {
        return Vec::new();
    }

    let mut clips: Vec<PathBuf> = WalkDir::new(clip_dir)
        .max_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| {
            e.path()
                .extension()
                .map(|ext| ext.eq_ignore_ascii_case("mp4"))
                .unwrap_or(false)
        })
        .map(|e| e.path().to_path_buf())
        .collect();
    clips.sort();

    if clips.is_empty() {
        info!("✓ No retained clips in {}", clip_dir.display());
    } else {
        warn!(
            count = clips.len(),
            "📦 Retained clips from earlier failed jobs in {}",
            clip_dir.display()
        );
        for clip in &clips {
            warn!("   {}", clip.display());
        }
    }
    clips
}
