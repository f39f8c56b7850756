//! Sync engine: pricing apply, change detection and dry-run recording.

pub mod change_detector;
pub mod dry_run;
pub mod pricing;

pub use change_detector::{ChangeDetector, ChangeNotification};
pub use dry_run::{DryRunInput, DryRunRecorder, DryRunVerdict};
pub use pricing::{PricingOutcome, PricingPreview, PricingSyncEngine, PricingTarget};
