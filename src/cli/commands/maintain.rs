//! `gt maintain`: standalone compaction pass.

use clap::Args;

use crate::Result;
use crate::daemon::compactor::run_maintain;
use crate::daemon::patrol::COMPACTOR_STANDALONE_THRESHOLD;
use crate::dolt::DoltClient;

#[derive(Args, Debug)]
pub struct MaintainArgs {
    /// Compact every database regardless of commit count.
    #[arg(long)]
    pub force: bool,

    /// Commit count threshold (default 10000 standalone).
    #[arg(long)]
    pub threshold: Option<u64>,
}

pub(crate) fn handle(args: MaintainArgs) -> Result<()> {
    let town = super::super::require_town_root()?;
    let dolt = DoltClient::new(&town);

    let threshold = args.threshold.unwrap_or(COMPACTOR_STANDALONE_THRESHOLD);
    let report = run_maintain(&dolt, threshold, args.force);

    println!(
        "Checked {} database(s); compacted {}; failed {}",
        report.checked,
        report.compacted.len(),
        report.failed.len()
    );
    for db in &report.compacted {
        println!("  + {db}");
    }
    for db in &report.failed {
        println!("  ! {db}");
    }

    if report.failed.is_empty() {
        Ok(())
    } else {
        Err(crate::dolt::DoltError::CommandFailed {
            verb: "maintain".to_string(),
            status: 1,
            stderr: format!("compaction failed for: {}", report.failed.join(", ")),
        }
        .into())
    }
}
