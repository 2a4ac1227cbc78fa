#[cfg(not(any(target_os = "macos", unix)))]
compile_error!("Only macos and unix are currently supported");

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use courier::{Courier, find_config_file};
use courier_common::{CampaignId, OutcomeKind, logging};

/// Paced, resumable newsletter dispatch
#[derive(Parser, Debug)]
#[command(name = "courier")]
#[command(version)]
struct Cli {
    /// Configuration file (defaults to COURIER_CONFIG, then ./courier.config.ron)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// More output; repeat for more detail (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Send every campaign that is due, once, within the relays' remaining credits
    Send {
        /// Send to each campaign's test recipients instead of its mailing list
        #[arg(long)]
        test: bool,
    },
    /// Keep sending as campaigns become due, until interrupted
    Serve {
        /// Send to each campaign's test recipients instead of its mailing list
        #[arg(long)]
        test: bool,
    },
    /// Show outcome statistics per campaign and remaining credits per relay
    Status {
        /// Only this campaign
        #[arg(long)]
        campaign: Option<u64>,
    },
    /// Record what a recipient did with a message, as reported by a link
    Engage {
        campaign: u64,
        uid: String,
        token: String,
        #[arg(value_enum)]
        action: Engagement,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Engagement {
    Opened,
    OpenedOnSite,
    LinkOpened,
    Unsubscribed,
}

impl From<Engagement> for OutcomeKind {
    fn from(engagement: Engagement) -> Self {
        match engagement {
            Engagement::Opened => Self::Opened,
            Engagement::OpenedOnSite => Self::OpenedOnSite,
            Engagement::LinkOpened => Self::LinkOpened,
            Engagement::Unsubscribed => Self::Unsubscribed,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    let config_path = find_config_file(cli.config.as_deref())?;
    let controller = Courier::from_path(&config_path)?.open().await?;

    match cli.command {
        Commands::Send { test } => {
            let reports = controller.send(test).await?;
            if reports.is_empty() {
                println!("Nothing to send");
            }
            for report in reports {
                println!(
                    "{}: {}/{} attempted, now {}",
                    report.label,
                    report.attempted(),
                    report.planned,
                    report.status
                );
                for (kind, count) in &report.outcomes {
                    println!("  {:<16} {count}", kind.as_str());
                }
            }
        }
        Commands::Serve { test } => controller.serve(test).await?,
        Commands::Status { campaign } => {
            let (campaigns, relays) = controller.status(campaign.map(CampaignId)).await?;
            for campaign in campaigns {
                println!("{campaign}");
            }
            for relay in relays {
                println!("{relay}");
            }
        }
        Commands::Engage {
            campaign,
            uid,
            token,
            action,
        } => {
            controller
                .engage(CampaignId(campaign), &uid, &token, action.into())
                .await?;
            println!("Recorded {} for campaign {campaign}", OutcomeKind::from(action));
        }
    }

    Ok(())
}
