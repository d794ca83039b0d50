use appsody_core::container::Engine;
use appsody_core::devloop::{self, DevOptions, Mode};
use appsody_core::Context;
use clap::Args;

/// Flags shared by `run`, `debug` and `test`.
#[derive(Args, Debug, Clone, Default)]
pub struct DevArgs {
    /// Container name (default <project>-dev)
    #[arg(long)]
    pub name: Option<String>,
    /// Publish a container port to the host (repeatable: -p 3000:3000 -p 9229)
    #[arg(short = 'p', long = "publish")]
    pub ports: Vec<String>,
    /// Publish every port the stack image exposes
    #[arg(short = 'P', long)]
    pub publish_all: bool,
    /// Docker network to attach the container to
    #[arg(long)]
    pub network: Option<String>,
    /// Volume holding the project dependencies (default <project>-deps)
    #[arg(long)]
    pub deps_volume: Option<String>,
    /// Extra options passed to docker run
    #[arg(long, default_value = "", allow_hyphen_values = true)]
    pub docker_options: String,
    /// Attach stdin to the container
    #[arg(short, long)]
    pub interactive: bool,
    /// Disable file watching in the container
    #[arg(long)]
    pub no_watcher: bool,
    /// Run the development environment in the cluster, building with buildah
    #[arg(long)]
    pub buildah: bool,
}

impl DevArgs {
    pub fn options(&self, mode: Mode) -> DevOptions {
        DevOptions {
            container_name: self.name.clone(),
            ports: self.ports.clone(),
            publish_all: self.publish_all,
            network: self.network.clone(),
            deps_volume: self.deps_volume.clone(),
            docker_options: self.docker_options.clone(),
            interactive: self.interactive,
            no_watcher: self.no_watcher,
            ..DevOptions::new(mode)
        }
    }
}

pub fn run(ctx: Context, mode: Mode, args: DevArgs) -> anyhow::Result<()> {
    let ctx = if args.buildah {
        ctx.with_engine(Engine::Buildah)
    } else {
        ctx
    };
    tracing::info!("Running development environment...");
    devloop::run(&ctx, &args.options(mode))?;
    Ok(())
}
