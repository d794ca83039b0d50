use appsody_core::build::{self, BuildOptions};
use appsody_core::container::Engine;
use appsody_core::{paths, Context};
use clap::Args;

#[derive(Args, Debug, Clone)]
pub struct BuildArgs {
    /// Image tag (default: the project name)
    #[arg(short, long)]
    pub tag: Option<String>,
    /// Push the image after building it
    #[arg(long)]
    pub push: bool,
    /// Registry the image is pushed to; implies --push
    #[arg(long)]
    pub push_url: Option<String>,
    /// Registry the cluster pulls the image from
    #[arg(long)]
    pub pull_url: Option<String>,
    /// Extra options passed to docker build
    #[arg(long, default_value = "", allow_hyphen_values = true)]
    pub docker_options: String,
    /// Build with buildah instead of docker
    #[arg(long)]
    pub buildah: bool,
    /// Extra options passed to buildah bud
    #[arg(long, default_value = "", allow_hyphen_values = true)]
    pub buildah_options: String,
    /// Generate a Knative service in the deployment manifest
    #[arg(long)]
    pub knative: bool,
    /// Deployment manifest to create or update
    #[arg(short, long, default_value = paths::APP_DEPLOY_FILE)]
    pub file: String,
}

impl BuildArgs {
    pub fn options(&self) -> BuildOptions {
        BuildOptions {
            tag: self.tag.clone(),
            push: self.push,
            push_url: self.push_url.clone(),
            pull_url: self.pull_url.clone(),
            docker_options: self.docker_options.clone(),
            buildah_options: self.buildah_options.clone(),
            knative: self.knative,
            app_deploy_file: self.file.clone(),
            skip_deploy_config: false,
        }
    }

    pub fn engine(&self) -> Engine {
        if self.buildah {
            Engine::Buildah
        } else {
            Engine::Docker
        }
    }
}

pub fn run(ctx: Context, args: BuildArgs) -> anyhow::Result<()> {
    let ctx = ctx.with_engine(args.engine());
    build::build(&ctx, &args.options())?;
    Ok(())
}
