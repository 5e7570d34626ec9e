use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::workflow::types::{CoSignature, IdentityOverride, Signer, StageContent};
use crate::workflow::ViewContext;

pub mod commands;

#[derive(Parser)]
#[command(name = "stagegate")]
#[command(about = "Staged approval records with verified signatures")]
#[command(long_about = "Stagegate walks an approval record through a fixed sequence of stages. \
                       Each advance freezes the stage into history; gated stages require the \
                       signer to confirm a one-time code. Start with 'stagegate new'.")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Open a new record and allocate its protocol number
    New {
        #[arg(long, help = "Short description of the record")]
        title: String,
        /// Scope the protocol sequence is counted in (usually a sector)
        #[arg(long, help = "Sequence scope, e.g. a sector id")]
        scope: String,
        #[arg(long, help = "Protocol year (defaults to the current year)")]
        year: Option<i32>,
        #[arg(long, default_value = "COM", help = "Protocol prefix")]
        kind: String,
        /// Require the first stage signer to verify before advancing
        #[arg(long, help = "Gate the first advance on signer verification")]
        digital_signature: bool,
    },
    /// List stored records
    List,
    /// Show a record with its stage history
    Show {
        #[arg(help = "Record id or protocol, e.g. COM-006/2024")]
        record: String,
    },
    /// Display one stage, subject to navigation rules
    View {
        #[arg(help = "Record id or protocol")]
        record: String,
        stage: usize,
        #[arg(long, value_enum, default_value = "editor", help = "Screen the record is viewed from")]
        context: ContextArg,
    },
    /// Save content to the active stage, or to the trailing stage of a reopened record
    Save {
        #[arg(help = "Record id or protocol")]
        record: String,
        #[arg(long, help = "Stage to save (defaults to the active stage)")]
        stage: Option<usize>,
        #[command(flatten)]
        content: ContentArgs,
    },
    /// Freeze the active stage and move to the next one
    Advance {
        #[arg(help = "Record id or protocol")]
        record: String,
        #[command(flatten)]
        content: ContentArgs,
        #[command(flatten)]
        verification: VerificationArgs,
    },
    /// Freeze the last stage and complete the record
    Finish {
        #[arg(help = "Record id or protocol")]
        record: String,
        #[command(flatten)]
        content: ContentArgs,
        #[command(flatten)]
        verification: VerificationArgs,
        /// Confirm finishing; the record cannot advance afterwards
        #[arg(short = 'y', long, help = "Confirm that the record should be finished")]
        yes: bool,
    },
    /// Allow the last stage of a completed record to be corrected
    Reopen {
        #[arg(help = "Record id or protocol")]
        record: String,
    },
    /// Close a reopened record
    Close {
        #[arg(help = "Record id or protocol")]
        record: String,
    },
    /// Send a record for approval
    Submit {
        #[arg(help = "Record id or protocol")]
        record: String,
    },
    /// Approve a record awaiting approval
    Approve {
        #[arg(help = "Record id or protocol")]
        record: String,
    },
    /// Send a record awaiting approval back to its owner
    Reject {
        #[arg(help = "Record id or protocol")]
        record: String,
    },
    /// Confirm completion of a record left finishing
    Confirm {
        #[arg(help = "Record id or protocol")]
        record: String,
    },
    /// Inspect or consume protocol sequence numbers
    Seq {
        #[command(subcommand)]
        command: SeqCommands,
    },
}

#[derive(Subcommand)]
pub enum SeqCommands {
    /// Show the identifier the next record would probably get, without consuming it
    Peek {
        #[command(flatten)]
        target: SequenceArgs,
    },
    /// Consume and print the next identifier
    Next {
        #[command(flatten)]
        target: SequenceArgs,
    },
}

#[derive(Args, Clone, Debug)]
pub struct SequenceArgs {
    #[arg(long, help = "Sequence scope, e.g. a sector id")]
    pub scope: String,
    #[arg(long, help = "Protocol year (defaults to the current year)")]
    pub year: Option<i32>,
    #[arg(long, default_value = "COM", help = "Protocol prefix")]
    pub kind: String,
}

#[derive(Args, Clone, Debug, Default)]
pub struct ContentArgs {
    #[arg(long, default_value = "", help = "Stage body text")]
    pub body: String,
    #[arg(long = "signer", default_value = "", help = "Name of the stage signer")]
    pub signer_name: String,
    #[arg(long = "role", default_value = "", help = "Role of the stage signer")]
    pub signer_role: String,
    #[arg(long = "sector", default_value = "", help = "Sector of the stage signer")]
    pub signer_sector: String,
    #[arg(long = "co-signer", value_parser = parse_co_signature, help = "Additional signer as 'Name:Role' (repeatable)")]
    pub co_signers: Vec<CoSignature>,
}

impl ContentArgs {
    pub fn to_content(&self) -> StageContent {
        let mut content = StageContent::with_body(&self.body).signed_by(Signer::new(
            &self.signer_name,
            &self.signer_role,
            &self.signer_sector,
        ));
        content.co_signatures = self.co_signers.clone();
        content
    }
}

#[derive(Args, Clone, Debug, Default)]
pub struct VerificationArgs {
    #[arg(long, help = "One-time code from the signer's authenticator")]
    pub code: Option<String>,
    /// Proceed without verification when the signer cannot be resolved
    #[arg(long, requires = "override_reason", help = "Who confirms proceeding without verification")]
    pub override_by: Option<String>,
    #[arg(long, requires = "override_by", help = "Why verification is being skipped")]
    pub override_reason: Option<String>,
}

impl VerificationArgs {
    pub fn identity_override(&self) -> Option<IdentityOverride> {
        match (&self.override_by, &self.override_reason) {
            (Some(by), Some(reason)) => Some(IdentityOverride::new(by, reason)),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum ContextArg {
    Owner,
    Screening,
    Editor,
}

impl From<ContextArg> for ViewContext {
    fn from(arg: ContextArg) -> Self {
        match arg {
            ContextArg::Owner => ViewContext::OwnerTracking,
            ContextArg::Screening => ViewContext::ScreeningQueue,
            ContextArg::Editor => ViewContext::Editor,
        }
    }
}

fn parse_co_signature(raw: &str) -> Result<CoSignature, String> {
    let (name, role) = raw.split_once(':').unwrap_or((raw, ""));
    if name.trim().is_empty() {
        return Err("co-signer needs a name".to_string());
    }
    Ok(CoSignature {
        name: name.trim().to_string(),
        role: role.trim().to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_advance_arguments_build_content() {
        let cli = Cli::try_parse_from([
            "stagegate",
            "advance",
            "COM-006/2024",
            "--body",
            "Demand",
            "--signer",
            "Maria Lemos",
            "--role",
            "Chefe de Gabinete",
            "--co-signer",
            "Paulo Reis:Pregoeiro",
            "--code",
            "123456",
        ])
        .unwrap();

        match cli.command {
            Some(Commands::Advance {
                record,
                content,
                verification,
            }) => {
                assert_eq!(record, "COM-006/2024");
                let content = content.to_content();
                assert_eq!(content.body, "Demand");
                assert_eq!(content.signer.name, "Maria Lemos");
                assert_eq!(content.co_signatures[0].role, "Pregoeiro");
                assert_eq!(verification.code.as_deref(), Some("123456"));
                assert!(verification.identity_override().is_none());
            }
            _ => panic!("expected advance"),
        }
    }

    #[test]
    fn test_override_needs_both_flags() {
        let result = Cli::try_parse_from([
            "stagegate",
            "advance",
            "COM-006/2024",
            "--override-by",
            "supervisor",
        ]);
        assert!(result.is_err());
    }
}
