//! The virtual user lifecycle.
//!
//! Each user runs as an independent tokio task moving through four states:
//! idle (spawned but not yet running), running (repeating full scenario
//! iterations), draining (the stop signal fired mid-iteration and the
//! in-flight iteration is finishing), and terminated. The stop signal is
//! checked cooperatively between iterations, never between requests, so an
//! iteration is only ever cut short by the scheduler aborting the task once
//! the grace period expires.

use std::time::Instant;

use crate::driver::KvUser;
use crate::metrics::{DrillMetric, IterationMetric};
use crate::scenario::Scenario;

/// Commands sent from the parent to user tasks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserCommand {
    /// Tell the user task to stop launching iterations and exit.
    Exit,
}

pub(crate) async fn user_main(
    mut thread_user: KvUser,
    thread_scenario: Scenario,
    thread_receiver: flume::Receiver<UserCommand>,
) {
    info!("launching user {}...", thread_user.id);

    'iterations: loop {
        let iteration_started = Instant::now();

        // Run all groups in registration order, each group's steps strictly
        // sequentially. The pacing sleep is this task's only suspension point.
        for group in &thread_scenario.groups {
            debug!("user {}: starting group {}", thread_user.id, group.name);
            for step in &group.steps {
                for local_index in 0..step.count {
                    let spec = (step.template)(thread_user.id, local_index);
                    let _outcome = thread_user.execute(&step.tag, &spec).await;
                    tokio::time::sleep(step.pause).await;
                }
            }
        }

        thread_user.iterations += 1;
        // Best effort iteration metric.
        let _ = thread_user
            .metrics_tx
            .send(DrillMetric::Iteration(IterationMetric {
                elapsed: thread_user.started.elapsed().as_millis() as u64,
                user: thread_user.id,
                run_time: iteration_started.elapsed().as_millis() as u64,
            }));

        // An optional iteration limit ends the user without a stop signal.
        if thread_user.config.iterations > 0
            && thread_user.iterations >= thread_user.config.iterations
        {
            debug!(
                "user {}: completed {} iterations, exiting",
                thread_user.id, thread_user.iterations
            );
            break 'iterations;
        }

        if received_exit(&thread_receiver) {
            break 'iterations;
        }
    }

    info!(
        "exiting user {} after {} iterations...",
        thread_user.id, thread_user.iterations
    );
}

// Determine if the parent has sent a UserCommand::Exit message.
fn received_exit(thread_receiver: &flume::Receiver<UserCommand>) -> bool {
    match thread_receiver.try_recv() {
        // UserCommand::Exit received.
        Ok(UserCommand::Exit) => true,
        // The channel disconnecting also means the parent is gone.
        Err(flume::TryRecvError::Disconnected) => true,
        Err(flume::TryRecvError::Empty) => false,
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn exit_command() {
        let (sender, receiver) = flume::unbounded();

        // No command sent yet.
        assert!(!received_exit(&receiver));

        // Exit received.
        sender.send(UserCommand::Exit).unwrap();
        assert!(received_exit(&receiver));

        // A disconnected parent also means exit.
        drop(sender);
        assert!(received_exit(&receiver));
    }
}
