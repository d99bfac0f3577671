use anyhow::Result;
use clap::{ArgAction, Parser, Subcommand};

use crate::commands::{CredentialsCommand, RolesCommand};

#[derive(Debug, Clone, Parser)]
#[command(name = "samlex", version, about = "Exchange a SAML assertion for temporary AWS credentials", long_about = None)]
pub struct Cli {
    #[arg(
        short = 'p',
        long,
        global = true,
        default_value = "default",
        help = "AWS profile name"
    )]
    pub profile: String,

    #[arg(short = 'v', long, global = true, action = ArgAction::Count, help = "Increase verbosity (-v info, -vv debug, -vvv trace)")]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Commands {
    #[command(about = "Issue temporary credentials for a role in the SAML assertion")]
    Credentials(CredentialsCommand),
    #[command(about = "List the roles in the SAML assertion with their account aliases")]
    Roles(RolesCommand),
}

impl Cli {
    pub async fn execute(self) -> Result<()> {
        let profile = self.profile;
        let command = self
            .command
            .unwrap_or_else(|| Commands::Credentials(CredentialsCommand::default()));

        match command {
            Commands::Credentials(cmd) => cmd.execute(&profile).await,
            Commands::Roles(cmd) => cmd.execute(&profile).await,
        }
    }
}
