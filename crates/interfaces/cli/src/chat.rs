//! Interactive terminal consultation loop.
//!
//! Mirrors what the HTTP transport does per turn — command in, result out,
//! snapshot persisted — with stdin/stdout as the patient surface.  Type
//! `quit`, `exit`, or `stop` to end the consultation early.

use std::io::{BufRead, Write};
use std::sync::Arc;

use anyhow::{bail, Context, Result};

use iris_core::{Command, CommandResult, ConsultationState};
use iris_dialogue::{DialogueManager, TurnStore};

pub async fn run(
    manager: Arc<DialogueManager>,
    store: Arc<TurnStore>,
    resume: Option<String>,
) -> Result<()> {
    let (consultation_id, mut state) = match resume {
        Some(consultation_id) => {
            let state = store
                .load_latest_turn(&consultation_id)?
                .with_context(|| format!("no persisted turns for '{consultation_id}'"))?;
            println!(
                "Resuming consultation {consultation_id} at turn {} — please answer the last \
                 question again.",
                state.turn_count()
            );
            (consultation_id, state)
        }
        None => {
            let result = manager.handle(Command::Start).await?;
            let turn = match result {
                CommandResult::Turn(turn) => turn,
                CommandResult::Illegal(illegal) => bail!("start rejected: {}", illegal.reason),
                CommandResult::Final(_) => bail!("unexpected final report at start"),
            };
            let consultation_id = turn.turn_metadata.consultation_id.clone();
            store.save_turn(&consultation_id, &turn.state)?;
            println!("Consultation {consultation_id}");
            println!("\n{}", turn.system_output);
            (consultation_id, turn.state)
        }
    };

    let stdin = std::io::stdin();
    let mut lines = stdin.lock().lines();
    loop {
        print!("> ");
        std::io::stdout().flush()?;
        let Some(line) = lines.next() else { break };
        let user_input = line?;
        if user_input.trim().is_empty() {
            continue;
        }

        let command = Command::UserTurn { user_input, state: state.clone() };
        match manager.handle(command).await? {
            CommandResult::Turn(turn) => {
                store.save_turn(&consultation_id, &turn.state)?;
                println!("\n{}", turn.system_output);
                state = turn.state;
                if turn.consultation_complete {
                    finalize(&manager, state).await?;
                    return Ok(());
                }
            }
            CommandResult::Illegal(illegal) => bail!("turn rejected: {}", illegal.reason),
            CommandResult::Final(_) => bail!("unexpected final report mid-consultation"),
        }
    }

    Ok(())
}

async fn finalize(manager: &DialogueManager, state: ConsultationState) -> Result<()> {
    match manager.handle(Command::Finalize { state }).await? {
        CommandResult::Final(report) => {
            println!("\nClinical record: {}", report.json_path);
            println!("Summary: {}", report.summary_path);
            println!("Episodes recorded: {}", report.total_episodes);
            Ok(())
        }
        CommandResult::Illegal(illegal) => bail!("finalize rejected: {}", illegal.reason),
        CommandResult::Turn(_) => bail!("unexpected turn result at finalize"),
    }
}
