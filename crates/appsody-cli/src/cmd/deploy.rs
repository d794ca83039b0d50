use super::build::BuildArgs;
use appsody_core::deploy::{self, DeployOptions};
use appsody_core::{paths, Context};
use clap::{Args, Subcommand};

#[derive(Args, Debug, Clone)]
pub struct DeployArgs {
    #[command(flatten)]
    pub build: BuildArgs,
    /// Namespace to deploy into
    #[arg(short, long, default_value = "default")]
    pub namespace: String,
    /// Only write the deployment manifest
    #[arg(long)]
    pub generate_only: bool,
    /// Regenerate the deployment manifest even when it exists
    #[arg(long)]
    pub force: bool,
}

#[derive(Subcommand, Debug, Clone)]
pub enum DeploySubcommand {
    /// Delete the resources created by `appsody deploy`
    Delete {
        /// Deployment manifest the resources were created from
        #[arg(short, long, default_value = paths::APP_DEPLOY_FILE)]
        file: String,
        /// Namespace the application was deployed to
        #[arg(short, long, default_value = "default")]
        namespace: String,
    },
}

pub fn run(ctx: Context, subcmd: Option<DeploySubcommand>, args: DeployArgs) -> anyhow::Result<()> {
    match subcmd {
        Some(DeploySubcommand::Delete { file, namespace }) => {
            let file = paths::app_deploy_path(&ctx.project_dir, &file);
            deploy::delete(&ctx, &file, &namespace)?;
            Ok(())
        }
        None => {
            let ctx = ctx.with_engine(args.build.engine());
            let opts = DeployOptions {
                build: args.build.options(),
                namespace: args.namespace,
                generate_only: args.generate_only,
                force: args.force,
            };
            deploy::deploy(&ctx, &opts)?;
            Ok(())
        }
    }
}
