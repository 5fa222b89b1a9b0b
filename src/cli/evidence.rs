use std::time::Duration;

use colored::Colorize;
use rusqlite::Connection;

use crate::capture::LinkCapturer;
use crate::downloader::LinkDownloader;
use crate::error::Result;
use crate::pipeline::{evidence_step, EvidenceContext, EvidenceSummary};
use crate::provider::MessageProvider;
use crate::settings::Settings;

use super::{make_provider, open_store};

/// Shared by `scan` and `evidence`. Rendering is on when either the flag
/// or the settings ask for it.
pub(crate) fn collect(
    conn: &Connection,
    settings: &Settings,
    provider: &dyn MessageProvider,
    render: bool,
) -> Result<EvidenceSummary> {
    let link = &settings.link_capture;
    let downloader = LinkDownloader::new(&link.user_agent, Duration::from_millis(link.timeout_ms))?
        .with_max_bytes(link.max_download_bytes);
    let mut capturer = (render || link.render_enabled).then(|| LinkCapturer::from_settings(link));

    let data_dir = settings.data_path();
    let ctx = EvidenceContext {
        data_dir: &data_dir,
        link_capture: link,
        downloader: &downloader,
        capturer: capturer.as_mut(),
    };
    evidence_step(conn, provider, ctx)
}

pub(crate) fn print_summary(s: &EvidenceSummary) {
    println!(
        "Attachments: {} downloaded, {} failed{}",
        s.attachments_downloaded.to_string().green(),
        s.attachments_failed,
        if s.attachments_healed > 0 { format!(" ({} recovered ids)", s.attachments_healed) } else { String::new() }
    );
    println!(
        "Links:       {} tried, {} downloaded, {} rendered, {} need login, {} failed",
        s.links_tried,
        s.links_downloaded.to_string().green(),
        s.captures,
        s.links_need_login.to_string().yellow(),
        s.links_failed
    );
}

pub fn run(mock: Option<&str>, render: bool) -> Result<()> {
    let (settings, conn) = open_store()?;
    let provider = make_provider(&settings, mock)?;
    let summary = collect(&conn, &settings, provider.as_ref(), render)?;
    print_summary(&summary);
    Ok(())
}
