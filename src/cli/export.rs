use colored::Colorize;
use tracing::warn;

use crate::error::Result;
use crate::exporter::LocalFolderTarget;
use crate::pipeline::{export_step, preview_export};

use super::{make_provider, open_store, RangeArgs};

pub fn run(range: &RangeArgs, dry_run: bool) -> Result<()> {
    let range = range.resolve()?;
    let (settings, conn) = open_store()?;

    if dry_run {
        let paths = preview_export(&conn, &settings.export, &range)?;
        if paths.is_empty() {
            println!("Nothing to export for {}.", range.label);
        }
        for p in &paths {
            println!("{p}");
        }
        println!("{} file(s) would be exported.", paths.len());
        return Ok(());
    }

    let labeler = if settings.gmail.label_on_export {
        match make_provider(&settings, None) {
            Ok(p) => Some(p),
            Err(e) => {
                warn!(error = %e, "export labelling disabled");
                None
            }
        }
    } else {
        None
    };

    let target = LocalFolderTarget::new(settings.export_dir());
    let summary = export_step(&conn, &target, &settings.export, &range, labeler.as_deref())?;
    println!(
        "{} exported, {} failed, {} labeled -> {}",
        summary.exported.to_string().green(),
        if summary.failed > 0 { summary.failed.to_string().red().to_string() } else { "0".to_string() },
        summary.labeled,
        settings.export_dir().display()
    );
    Ok(())
}
