pub mod backfill;

pub use backfill::{BackfillMigrator, BackfillOptions, BackfillStats};
