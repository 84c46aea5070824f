use anyhow::{Context, Result};
use envdeck_core::{spawn_operation, LineSink, OperationEvent, OperationReporter, ProgressSink};
use envdeck_updater::{
    apply_update, check_for_update, HttpDownloader, InstallError, Relaunch, UpdateDecision,
    UpdateObserver, UpdateOutcome, UpdatePlan, UpdateState,
};

use crate::dispatch::AppContext;
use crate::env_flows::confirm_on_terminal;
use crate::render::TerminalProgress;

const CURRENT_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Turns installer callbacks into operation events: one line per state and
/// a fresh progress phase after each of them.
struct ReporterObserver<'a>(&'a mut OperationReporter<UpdateOutcome, InstallError>);

impl UpdateObserver for ReporterObserver<'_> {
    fn state_changed(&mut self, state: UpdateState) {
        self.0.restart_progress();
        self.0.line(0, state.as_str());
    }

    fn progress(&mut self, fraction: f64) {
        self.0.progress(fraction);
    }
}

fn check_current(ctx: &AppContext) -> Result<UpdateDecision> {
    let source = ctx.config.release_source();
    ctx.renderer.print_status(
        "step",
        &format!("checking {}", source.latest_release_url()),
    );
    check_for_update(&source, CURRENT_VERSION)
        .with_context(|| format!("update check against {} failed", source.repo))
}

pub fn format_update_decision_lines(decision: &UpdateDecision) -> Vec<String> {
    if !decision.available {
        return vec![format!(
            "envdeck {} is up to date (latest release {})",
            decision.current_version, decision.latest_version
        )];
    }

    let mut lines = vec![format!(
        "update available: envdeck {} -> {}",
        decision.current_version, decision.latest_version
    )];
    if let Some(notes) = &decision.notes {
        lines.extend(notes.lines().map(|line| format!("  {line}")));
    }
    if decision.assets.is_empty() {
        lines.push(format!(
            "release {} has no installable archive; download it manually",
            decision.latest_version
        ));
    }
    lines
}

pub fn run_self_check(ctx: &AppContext) -> Result<()> {
    let decision = check_current(ctx)?;
    ctx.renderer
        .print_lines(&format_update_decision_lines(&decision));
    Ok(())
}

pub fn run_self_update(ctx: &AppContext, yes: bool) -> Result<()> {
    let renderer = ctx.renderer;
    renderer.print_section("self-update");
    let decision = check_current(ctx)?;
    renderer.print_lines(&format_update_decision_lines(&decision));
    if !decision.available {
        return Ok(());
    }

    let install_dir = ctx.config.resolve_install_dir()?;
    let exe = std::env::current_exe().context("failed to resolve current executable")?;
    let relaunch = Relaunch::new(exe).args(["--version"]);
    let plan = UpdatePlan::from_decision(&decision, &install_dir, relaunch)?
        .with_restart_delay(ctx.config.restart_delay());

    let prompt = format!(
        "Replace {} with envdeck {}?",
        install_dir.display(),
        plan.version
    );
    if !yes && !confirm_on_terminal(&prompt)? {
        renderer.print_status("warn", "update cancelled");
        return Ok(());
    }

    let downloader = HttpDownloader::new()?;
    let layout = ctx.layout.clone();
    let handle = spawn_operation(move |reporter| {
        apply_update(&layout, &downloader, &plan, &mut ReporterObserver(reporter))
    });

    let mut progress: Option<TerminalProgress> = None;
    let result = handle.finish(|event| match event {
        OperationEvent::Line { text, .. } => {
            if let Some(bar) = progress.take() {
                bar.finish_success();
            }
            renderer.print_status("step", &format!("update: {text}"));
            progress = progress_label(text).map(|label| renderer.start_progress(label));
        }
        OperationEvent::Progress(fraction) => {
            if let Some(bar) = progress.as_mut() {
                bar.set_fraction(*fraction);
            }
        }
        OperationEvent::Finished(_) => {}
    });
    if let Some(bar) = progress.take() {
        match &result {
            Ok(_) => bar.finish_success(),
            Err(_) => bar.finish_abandon(),
        }
    }

    let outcome = result?;
    renderer.print_status(
        "ok",
        &format!(
            "envdeck {} staged; previous installation backed up to {}",
            outcome.version,
            outcome.backup_dir.display()
        ),
    );
    renderer.print_status(
        "step",
        &format!(
            "files are replaced {}s after this process exits",
            ctx.config.restart_delay_secs.max(1)
        ),
    );
    Ok(())
}

fn progress_label(state: &str) -> Option<&'static str> {
    match state {
        "downloading" => Some("download"),
        "extracting" => Some("extract"),
        _ => None,
    }
}
