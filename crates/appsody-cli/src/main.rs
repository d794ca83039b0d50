mod cmd;
mod logging;
mod output;

use appsody_core::{paths, Context};
use clap::{Parser, Subcommand};
use cmd::build::BuildArgs;
use cmd::deploy::{DeployArgs, DeploySubcommand};
use cmd::dev::DevArgs;
use cmd::operator::OperatorSubcommand;
use cmd::repo::RepoSubcommand;
use cmd::stack::StackSubcommand;
use output::OutputFormat;
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "appsody",
    about = "Create, run, build and deploy applications from appsody stacks",
    version
)]
struct Cli {
    /// Config file (default is $HOME/.appsody/.appsody.yaml)
    #[arg(long, global = true, env = "APPSODY_CONFIG")]
    config: Option<PathBuf>,

    /// Print the commands that would run without running them
    #[arg(long, global = true)]
    dryrun: bool,

    /// Turn on debug output and log to a file in $HOME/.appsody/logs
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize an appsody project with a stack and template
    Init {
        /// Stack to use, optionally qualified by its repository: [repo/]stack
        stack: Option<String>,
        /// Template to install; "none" installs no template
        template: Option<String>,
        /// Download and extract the template over existing files
        #[arg(long)]
        overwrite: bool,
        /// Only create the project configuration (deprecated, use template "none")
        #[arg(long)]
        no_template: bool,
        /// Project name used for containers and deployments
        #[arg(long)]
        project_name: Option<String>,
        /// Application name label for the deployment
        #[arg(long)]
        application_name: Option<String>,
        /// Registry host[:port] the stack image is pulled from
        #[arg(long)]
        stack_registry: Option<String>,
    },
    /// Run the project in the local development environment
    Run(DevArgs),
    /// Run the project in debug mode
    Debug(DevArgs),
    /// Run the project's tests in the development environment
    Test(DevArgs),
    /// Build a deployable image of the project
    Build(BuildArgs),
    /// Build and deploy the project to Kubernetes
    Deploy {
        #[command(subcommand)]
        subcommand: Option<DeploySubcommand>,
        #[command(flatten)]
        args: DeployArgs,
    },
    /// Extract the stack and project into a single directory
    Extract {
        /// Directory to extract into; must not exist
        #[arg(long)]
        target_dir: Option<PathBuf>,
        /// Name of the utility container (default <project>-extract)
        #[arg(long)]
        name: Option<String>,
        /// Use buildah instead of docker
        #[arg(long)]
        buildah: bool,
    },
    /// Stop the local development environment
    Stop {
        /// Container to stop (default <project>-dev)
        #[arg(long)]
        name: Option<String>,
    },
    /// List the running appsody development containers
    Ps,
    /// Show the appsody version
    Version,
    /// List the stacks available in the configured repositories
    List {
        /// Only list stacks of this repository
        repo: Option<String>,
        /// Output format
        #[arg(short, long, value_enum)]
        output: Option<OutputFormat>,
    },
    /// Manage the configured stack repositories
    Repo {
        #[command(subcommand)]
        subcommand: RepoSubcommand,
    },
    /// Install or uninstall the appsody operator
    Operator {
        #[command(subcommand)]
        subcommand: OperatorSubcommand,
    },
    /// Tools for stack authors
    Stack {
        #[command(subcommand)]
        subcommand: StackSubcommand,
    },
}

fn main() {
    let cli = Cli::parse();

    let ctx = match Context::load(cli.config.as_deref(), cli.dryrun, cli.verbose) {
        Ok(ctx) => ctx,
        Err(e) => {
            eprintln!("error: {e}");
            std::process::exit(1);
        }
    };
    let log_file = cli
        .verbose
        .then(|| paths::log_file(&ctx.home, chrono::Local::now()));
    logging::init(cli.verbose, log_file.as_deref());

    let result = ctx
        .ensure_home()
        .map_err(anyhow::Error::from)
        .and_then(|()| dispatch(ctx, cli.command));

    if let Err(e) = result {
        if cli.verbose {
            tracing::debug!("{e:?}");
        }
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}

fn dispatch(ctx: Context, command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Init {
            stack,
            template,
            overwrite,
            no_template,
            project_name,
            application_name,
            stack_registry,
        } => cmd::init::run(
            &ctx,
            appsody_core::init::InitOptions {
                stack,
                template,
                overwrite,
                no_template,
                project_name,
                application_name,
                stack_registry,
            },
        ),
        Commands::Run(args) => cmd::dev::run(ctx, appsody_core::devloop::Mode::Run, args),
        Commands::Debug(args) => cmd::dev::run(ctx, appsody_core::devloop::Mode::Debug, args),
        Commands::Test(args) => cmd::dev::run(ctx, appsody_core::devloop::Mode::Test, args),
        Commands::Build(args) => cmd::build::run(ctx, args),
        Commands::Deploy { subcommand, args } => cmd::deploy::run(ctx, subcommand, args),
        Commands::Extract {
            target_dir,
            name,
            buildah,
        } => cmd::extract::run(ctx, target_dir, name, buildah),
        Commands::Stop { name } => cmd::stop::run(&ctx, name),
        Commands::Ps => cmd::ps::run(),
        Commands::Version => cmd::version::run(),
        Commands::List { repo, output } => cmd::list::run(&ctx, repo.as_deref(), output),
        Commands::Repo { subcommand } => cmd::repo::run(&ctx, subcommand),
        Commands::Operator { subcommand } => cmd::operator::run(&ctx, subcommand),
        Commands::Stack { subcommand } => cmd::stack::run(&ctx, subcommand),
    }
}
