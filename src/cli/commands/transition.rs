use anyhow::{bail, Result};

use super::{App, Command};
use crate::cli::{ContentArgs, VerificationArgs};
use crate::workflow::types::WorkflowInstance;
use crate::workflow::{TransitionChallenge, TransitionOutcome};

pub struct AdvanceCommand {
    pub record: String,
    pub content: ContentArgs,
    pub verification: VerificationArgs,
}

impl Command for AdvanceCommand {
    async fn execute(&self, app: &App) -> Result<()> {
        let mut instance = app.find_record(&self.record).await?;
        let content = self.content.to_content();

        let outcome = match self.verification.identity_override() {
            Some(identity_override) => {
                app.coordinator
                    .advance_with_override(&mut instance, content, identity_override)
                    .await?
            }
            None => app.coordinator.advance(&mut instance, content).await?,
        };

        settle(app, &mut instance, outcome, &self.verification).await?;
        println!(
            "➡️  {} is now at stage {} {}",
            instance.protocol,
            instance.current_stage_index,
            app.coordinator.labels().label(instance.current_stage_index)
        );
        Ok(())
    }
}

pub struct FinishCommand {
    pub record: String,
    pub content: ContentArgs,
    pub verification: VerificationArgs,
    pub yes: bool,
}

impl Command for FinishCommand {
    async fn execute(&self, app: &App) -> Result<()> {
        let mut instance = app.find_record(&self.record).await?;
        let content = self.content.to_content();

        let outcome = match self.verification.identity_override() {
            Some(identity_override) => {
                app.coordinator
                    .finish_with_override(&mut instance, content, self.yes, identity_override)
                    .await?
            }
            None => app.coordinator.finish(&mut instance, content, self.yes).await?,
        };

        settle(app, &mut instance, outcome, &self.verification).await?;
        println!("🏁 {} finished ({})", instance.protocol, instance.status);
        Ok(())
    }
}

/// Resolve an issued challenge with the code given on the command line
async fn settle(
    app: &App,
    instance: &mut WorkflowInstance,
    outcome: TransitionOutcome,
    verification: &VerificationArgs,
) -> Result<()> {
    let mut challenge = match outcome {
        TransitionOutcome::Committed { .. } => return Ok(()),
        TransitionOutcome::ChallengeIssued(challenge) => challenge,
    };

    let Some(code) = verification.code.as_deref() else {
        describe_challenge(&challenge);
        app.coordinator.cancel_challenge(challenge);
        bail!("verification required: rerun with --code <CODE>");
    };

    match app
        .coordinator
        .resolve_challenge(instance, &mut challenge, code)
        .await
    {
        Ok(_) => {
            println!("🔐 Signature verified for {}", challenge.identity().name);
            Ok(())
        }
        Err(e) => {
            app.coordinator.cancel_challenge(challenge);
            Err(e.into())
        }
    }
}

fn describe_challenge(challenge: &TransitionChallenge) {
    let factors: Vec<String> = challenge
        .eligible_factors()
        .iter()
        .map(ToString::to_string)
        .collect();
    println!(
        "🔐 {} ({}) must confirm a one-time code",
        challenge.identity().name,
        challenge.identity().role
    );
    println!("   Accepted factors: {}", factors.join(", "));
}
