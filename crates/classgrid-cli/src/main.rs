use clap::{Parser, Subcommand};

mod commands;
mod report;

#[derive(Parser)]
#[command(
    name = "classgrid",
    about = "classgrid: balanced group assignment for a roster",
    version,
    propagate_version = true,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Assign a roster to groups and print the selected scenario.
    ///
    /// The roster is a JSON array of records with `name`, `gender`
    /// ("boy" or "girl"), `good_language`, the optional flags `founder`,
    /// `high_energy` and `special_needs`, `performance` (1 to 3) and the
    /// `friends` / `conflicts` name lists.
    Assign {
        /// Path to the JSON roster
        #[arg(short, long)]
        roster: String,
        /// Engine configuration (TOML); defaults apply when omitted
        #[arg(short, long)]
        config: Option<String>,
        /// Override the number of groups
        #[arg(short, long)]
        groups: Option<usize>,
        /// Override the random seed
        #[arg(short, long)]
        seed: Option<u64>,
        /// Output format: text or json
        #[arg(short, long, default_value = "text")]
        format: String,
    },
    /// Print the default engine configuration as TOML
    Config,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("classgrid=info".parse()?)
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Assign {
            roster,
            config,
            groups,
            seed,
            format,
        } => commands::assign::assign(&commands::assign::AssignArgs {
            roster: &roster,
            config: config.as_deref(),
            groups,
            seed,
            format: &format,
        }),
        Commands::Config => commands::config::print_default(),
    }
}
