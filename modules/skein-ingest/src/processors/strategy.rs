//! Immediate-vs-background processing decision.

use tracing::debug;

use skein_common::AssetKind;

const SMALL_FILE_THRESHOLD: u64 = 5 * 1024 * 1024;
const LARGE_FILE_THRESHOLD: u64 = 10 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct ProcessingStrategy {
    default_immediate: bool,
}

impl ProcessingStrategy {
    pub fn new(default_immediate: bool) -> Self {
        Self { default_immediate }
    }

    /// First applicable rule wins:
    /// 1. explicit user preference
    /// 2. > 10 MB: background
    /// 3. 5-10 MB CSV/PDF: background
    /// 4. < 5 MB: immediate
    /// 5. web scraping: immediate
    /// 6. CSV/PDF with unknown size: background
    /// 7. system default
    pub fn should_process_immediately(
        &self,
        kind: AssetKind,
        user_preference: Option<bool>,
        file_size: Option<u64>,
    ) -> bool {
        if let Some(preference) = user_preference {
            debug!(?kind, preference, "user preference");
            return preference;
        }

        if let Some(size) = file_size {
            if size > LARGE_FILE_THRESHOLD {
                debug!(?kind, size, "large file -> background");
                return false;
            }
            if size > SMALL_FILE_THRESHOLD
                && matches!(kind, AssetKind::Csv | AssetKind::Pdf)
            {
                debug!(?kind, size, "medium file with heavy processing -> background");
                return false;
            }
            if size < SMALL_FILE_THRESHOLD {
                debug!(?kind, size, "small file -> immediate");
                return true;
            }
        }

        if kind == AssetKind::Web {
            debug!("web scraping -> immediate");
            return true;
        }

        if matches!(kind, AssetKind::Csv | AssetKind::Pdf) {
            debug!(?kind, "heavy kind without size info -> background");
            return false;
        }

        debug!(default = self.default_immediate, "system default");
        self.default_immediate
    }

    /// Coarse human-readable processing-time estimate for UI feedback.
    pub fn estimate_processing_time(&self, kind: AssetKind, file_size: Option<u64>) -> &'static str {
        if file_size.is_some_and(|s| s > LARGE_FILE_THRESHOLD) {
            return "several minutes";
        }
        match kind {
            AssetKind::Pdf => {
                if file_size.is_some_and(|s| s > SMALL_FILE_THRESHOLD) {
                    "~1-2 minutes"
                } else {
                    "~30 seconds"
                }
            }
            AssetKind::Csv => {
                if file_size.is_some_and(|s| s > SMALL_FILE_THRESHOLD) {
                    "~2-5 minutes"
                } else {
                    "~10-30 seconds"
                }
            }
            AssetKind::Web => "< 5 seconds",
            _ => "< 1 minute",
        }
    }
}

impl Default for ProcessingStrategy {
    fn default() -> Self {
        Self::new(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_preference_wins() {
        let strategy = ProcessingStrategy::default();
        assert!(!strategy.should_process_immediately(
            AssetKind::Text,
            Some(false),
            Some(100)
        ));
        assert!(strategy.should_process_immediately(
            AssetKind::Csv,
            Some(true),
            Some(100 * 1024 * 1024)
        ));
    }

    #[test]
    fn test_size_thresholds() {
        let strategy = ProcessingStrategy::default();
        // > 10 MB: background, whatever the kind.
        assert!(!strategy.should_process_immediately(AssetKind::Text, None, Some(11 * 1024 * 1024)));
        // 5-10 MB CSV: background.
        assert!(!strategy.should_process_immediately(AssetKind::Csv, None, Some(6 * 1024 * 1024)));
        // 5-10 MB of anything else falls through to the default.
        assert!(strategy.should_process_immediately(AssetKind::Text, None, Some(6 * 1024 * 1024)));
        // < 5 MB: immediate.
        assert!(strategy.should_process_immediately(AssetKind::Pdf, None, Some(1024)));
    }

    #[test]
    fn test_unknown_size_conservative_for_heavy_kinds() {
        let strategy = ProcessingStrategy::default();
        assert!(!strategy.should_process_immediately(AssetKind::Csv, None, None));
        assert!(!strategy.should_process_immediately(AssetKind::Pdf, None, None));
        assert!(strategy.should_process_immediately(AssetKind::Web, None, None));
        assert!(strategy.should_process_immediately(AssetKind::Text, None, None));
    }
}
