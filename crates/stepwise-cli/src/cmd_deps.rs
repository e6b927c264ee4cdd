use anyhow::{Result, bail};
use clap::Subcommand;
use stepwise::v1::manifest::Overrides;
use stepwise_git::{CommandRenderer, ManualRenderer, NoopRenderer, Orchestrator, RewriteState};

#[derive(Subcommand, Debug)]
pub enum DepsOp {
    /// Set package versions in every step that touches the manifest
    Update {
        /// Versions to set, as NAME=VERSION
        #[arg(required = true)]
        packages: Vec<String>,
    },
}

pub fn run(orchestrator: &Orchestrator, op: DepsOp) -> Result<()> {
    match op {
        DepsOp::Update { packages } => run_update(orchestrator, &packages),
    }
}

fn run_update(orchestrator: &Orchestrator, packages: &[String]) -> Result<()> {
    let overrides = parse_overrides(packages)?;

    let command_renderer = CommandRenderer::from_config(&orchestrator.config().manuals);
    let renderer: &dyn ManualRenderer = match &command_renderer {
        Some(renderer) => renderer,
        None => &NoopRenderer,
    };

    match stepwise_git::update_dependencies(orchestrator, &overrides, renderer)? {
        RewriteState::NotStarted => println!(
            "No step touches {}",
            orchestrator.config().manifest.path.display()
        ),
        RewriteState::Completed => println!("Updated {} package(s)", overrides.len()),
        _ => {}
    }
    Ok(())
}

fn parse_overrides(packages: &[String]) -> Result<Overrides> {
    let mut overrides = Overrides::new();
    for package in packages {
        // Versions may contain `=` themselves (`>=1.2`).
        match package.split_once('=') {
            Some((name, version)) if !name.is_empty() && !version.is_empty() => {
                overrides.insert(name.to_string(), version.to_string());
            }
            _ => bail!("Expected NAME=VERSION, got {:?}", package),
        }
    }
    Ok(overrides)
}
