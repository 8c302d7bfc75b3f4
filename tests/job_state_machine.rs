// tests/job_state_machine.rs

mod common;
use crate::common::init_tracing;

use std::time::Duration;

use cronvisor::host::{ExitStatus, SignalKind};
use cronvisor::job::{
    Job, JobError, JobLimits, JobState, KillOutcome, ReconfigOutcome, RunOutcome, ScheduleMode,
};
use cronvisor::sink::JobEvent;
use cronvisor_test_utils::fake_reactor::FIRST_PID;
use cronvisor_test_utils::{Harness, JobDescriptorBuilder};

/// Periodic job that has been initialized and fired once, so it is running.
fn running_periodic(h: &mut Harness, kill: bool) -> Job {
    let mut job = JobDescriptorBuilder::named("uptime")
        .periodic(5)
        .kill(kill)
        .build_job();
    job.initialize(&mut h.cx()).unwrap();
    h.fire_run_timer(&mut job);
    assert_eq!(job.state(), JobState::Running);
    job
}

#[test]
fn periodic_initialize_arms_an_immediate_repeating_timer() {
    init_tracing();
    let mut h = Harness::new();
    let mut job = JobDescriptorBuilder::named("uptime").periodic(5).build_job();
    assert_eq!(job.state(), JobState::Uninitialized);

    job.initialize(&mut h.cx()).unwrap();

    assert_eq!(job.state(), JobState::Idle);
    let timer = h.reactor.timer(job.run_timer().unwrap()).unwrap();
    assert_eq!(timer.first, Duration::ZERO);
    assert_eq!(timer.period, Some(Duration::from_secs(5)));
    assert_eq!(h.reactor.spawn_count(), 0);
}

#[test]
fn initialize_twice_is_rejected() {
    let mut h = Harness::new();
    let mut job = JobDescriptorBuilder::named("uptime").build_job();
    job.initialize(&mut h.cx()).unwrap();
    assert_eq!(
        job.initialize(&mut h.cx()),
        Err(JobError::AlreadyInitialized("uptime".to_string()))
    );
}

#[test]
fn periodic_tick_spawns_with_job_name_as_argv0() {
    init_tracing();
    let mut h = Harness::new();
    let mut job = JobDescriptorBuilder::new("load", "/usr/bin/cat")
        .periodic(5)
        .arg("/proc/loadavg")
        .env("LC_ALL", "C")
        .cwd("/tmp")
        .build_job();
    job.initialize(&mut h.cx()).unwrap();
    h.fire_run_timer(&mut job);

    let spawn = h.reactor.last_spawn().unwrap().clone();
    assert_eq!(spawn.job, "load");
    assert_eq!(spawn.path.to_str(), Some("/usr/bin/cat"));
    assert_eq!(spawn.args, vec!["/proc/loadavg".to_string()]);
    assert_eq!(spawn.env, vec![("LC_ALL".to_string(), "C".to_string())]);
    assert_eq!(spawn.cwd.as_deref().and_then(|p| p.to_str()), Some("/tmp"));
    assert_eq!(job.argv(), vec!["load".to_string(), "/proc/loadavg".to_string()]);

    assert_eq!(job.pid(), FIRST_PID);
    assert_eq!(job.run_count(), 1);
    assert_eq!(h.reactor.registered_pipes.len(), 2);
    assert_eq!(
        h.sink.events_for("load"),
        vec![JobEvent::Started { pid: FIRST_PID }]
    );
}

#[test]
fn sentinel_delivers_a_block_to_the_sink() {
    let mut h = Harness::new();
    let mut job = JobDescriptorBuilder::named("uptime")
        .periodic(5)
        .prefix("up ")
        .build_job();
    job.initialize(&mut h.cx()).unwrap();
    h.fire_run_timer(&mut job);

    h.reactor.push_stdout("1 day\n2 users\n-\nnext");
    h.pump(&mut job);

    assert_eq!(
        h.sink.blocks("uptime"),
        vec![vec!["up 1 day".to_string(), "up 2 users".to_string()]]
    );
    assert_eq!(job.num_output_blocks(), 1);
    assert_eq!(job.queued_lines(), 0);
}

#[test]
fn two_blocks_in_one_read_are_both_delivered() {
    let mut h = Harness::new();
    let mut job = running_periodic(&mut h, false);

    h.reactor.push_stdout("a\n-\nb\n-\n");
    h.pump(&mut job);

    assert_eq!(
        h.sink.blocks("uptime"),
        vec![vec!["a".to_string()], vec!["b".to_string()]]
    );
    assert_eq!(job.num_output_blocks(), 2);
}

#[test]
fn reads_per_event_are_bounded() {
    let mut h = Harness::new();
    let mut job = JobDescriptorBuilder::named("chatty").periodic(5).build_job();
    job.set_limits(JobLimits {
        max_reads_per_event: 2,
        read_chunk_size: 2,
        ..JobLimits::default()
    });
    job.initialize(&mut h.cx()).unwrap();
    h.fire_run_timer(&mut job);

    h.reactor.push_stdout("ab\ncd\n-\n");
    h.pump(&mut job);
    assert!(h.sink.blocks("chatty").is_empty());

    h.pump(&mut job);
    h.pump(&mut job);
    assert_eq!(
        h.sink.blocks("chatty"),
        vec![vec!["ab".to_string(), "cd".to_string()]]
    );
}

#[test]
fn first_kill_sends_term_and_arms_exactly_one_kill_timer() {
    init_tracing();
    let mut h = Harness::new();
    let mut job = running_periodic(&mut h, false);
    let pid = job.pid();

    assert_eq!(job.kill_job(false, &mut h.cx()), Ok(KillOutcome::TermSent));
    assert_eq!(job.state(), JobState::TermSent);
    let kill_timer = job.kill_timer().unwrap();
    assert_eq!(
        h.reactor.timer(kill_timer).unwrap().first,
        JobLimits::default().kill_grace
    );
    // Run timer plus kill timer.
    assert_eq!(h.reactor.timers_for("uptime").len(), 2);

    assert_eq!(job.kill_job(false, &mut h.cx()), Ok(KillOutcome::KillSent));
    assert_eq!(job.state(), JobState::KillSent);
    assert_eq!(job.kill_timer(), None);
    assert!(!h.reactor.is_armed(kill_timer));
    assert_eq!(h.reactor.timers_for("uptime").len(), 1);
    assert_eq!(h.reactor.signals_to(pid), vec![SignalKind::Term, SignalKind::Kill]);

    assert!(matches!(
        job.kill_job(false, &mut h.cx()),
        Err(JobError::NothingToKill { .. })
    ));
}

#[test]
fn kill_timer_escalates_to_sigkill() {
    let mut h = Harness::new();
    let mut job = running_periodic(&mut h, false);
    let pid = job.pid();

    job.kill_job(false, &mut h.cx()).unwrap();
    h.fire_kill_timer(&mut job);

    assert_eq!(job.state(), JobState::KillSent);
    assert_eq!(h.reactor.signals_to(pid), vec![SignalKind::Term, SignalKind::Kill]);
}

#[test]
fn forced_kill_repeats_sigkill_but_a_graceful_one_does_not() {
    let mut h = Harness::new();
    let mut job = running_periodic(&mut h, false);
    let pid = job.pid();

    assert_eq!(job.kill_job(true, &mut h.cx()), Ok(KillOutcome::KillSent));
    assert_eq!(job.kill_job(true, &mut h.cx()), Ok(KillOutcome::KillSent));
    assert!(job.kill_job(false, &mut h.cx()).is_err());

    assert_eq!(job.state(), JobState::KillSent);
    assert_eq!(job.kill_timer(), None);
    assert_eq!(h.reactor.signals_to(pid), vec![SignalKind::Kill, SignalKind::Kill]);
}

#[test]
fn kill_without_a_process_does_nothing() {
    let mut h = Harness::new();
    let mut job = JobDescriptorBuilder::named("idle").periodic(5).build_job();
    job.initialize(&mut h.cx()).unwrap();

    assert_eq!(job.kill_job(true, &mut h.cx()), Ok(KillOutcome::NotRunning));
    assert!(h.reactor.signals.is_empty());
}

#[test]
fn reap_clears_pid_and_cancels_the_kill_timer() {
    let mut h = Harness::new();
    let mut job = running_periodic(&mut h, false);
    let pid = job.pid();
    job.kill_job(false, &mut h.cx()).unwrap();
    let kill_timer = job.kill_timer().unwrap();

    h.exit(&mut job, ExitStatus::Signaled(15));

    assert_eq!(job.pid(), 0);
    assert_eq!(job.state(), JobState::Idle);
    assert_eq!(job.kill_timer(), None);
    assert!(!h.reactor.is_armed(kill_timer));
    assert_eq!(
        h.sink.events_for("uptime"),
        vec![
            JobEvent::Started { pid },
            JobEvent::Died {
                pid,
                status: ExitStatus::Signaled(15)
            },
        ]
    );
}

#[test]
fn reap_with_mismatched_pid_still_clears_state() {
    let mut h = Harness::new();
    let mut job = running_periodic(&mut h, false);

    job.reap(4242, ExitStatus::Exited(0), &mut h.cx());

    assert_eq!(job.pid(), 0);
    assert!(!job.state().has_process());
}

#[test]
fn unterminated_final_block_is_delivered_on_exit() {
    let mut h = Harness::new();
    let mut job = running_periodic(&mut h, false);
    let spawn = h.reactor.last_spawn().unwrap().clone();

    h.reactor.push_stdout("last\npartial");
    h.exit(&mut job, ExitStatus::Exited(0));

    assert_eq!(h.sink.blocks("uptime"), vec![vec!["last".to_string()]]);
    assert!(h.reactor.is_pipe_closed(spawn.stdout));
    assert!(h.reactor.is_pipe_closed(spawn.stderr));
}

#[test]
fn wait_for_exit_with_zero_period_restarts_within_reap() {
    init_tracing();
    let mut h = Harness::new();
    let mut job = JobDescriptorBuilder::named("tail").wait_for_exit(0).build_job();

    job.initialize(&mut h.cx()).unwrap();
    assert_eq!(job.state(), JobState::Running);
    assert_eq!(h.reactor.spawn_count(), 1);

    h.exit(&mut job, ExitStatus::Exited(1));

    assert_eq!(job.state(), JobState::Running);
    assert_eq!(h.reactor.spawn_count(), 2);
    assert_eq!(job.pid(), FIRST_PID + 1);
    assert_eq!(job.run_timer(), None);
}

#[test]
fn wait_for_exit_with_period_restarts_after_a_one_shot_timer() {
    let mut h = Harness::new();
    let mut job = JobDescriptorBuilder::named("tail").wait_for_exit(10).build_job();
    job.initialize(&mut h.cx()).unwrap();

    h.exit(&mut job, ExitStatus::Exited(0));
    assert_eq!(job.state(), JobState::Idle);
    let timer = h.reactor.timer(job.run_timer().unwrap()).unwrap().clone();
    assert_eq!(timer.first, Duration::from_secs(10));
    assert_eq!(timer.period, None);

    h.fire_run_timer(&mut job);
    assert_eq!(job.state(), JobState::Running);
    assert_eq!(job.run_timer(), None);
    assert_eq!(h.reactor.spawn_count(), 2);
}

#[test]
fn periodic_with_kill_replaces_a_still_running_instance() {
    init_tracing();
    let mut h = Harness::new();
    let mut job = running_periodic(&mut h, true);
    let first_pid = job.pid();

    h.fire_run_timer(&mut job);
    assert_eq!(job.state(), JobState::TermSent);
    assert_eq!(h.reactor.signals_to(first_pid), vec![SignalKind::Term]);
    assert_eq!(h.reactor.spawn_count(), 1);

    h.exit(&mut job, ExitStatus::Signaled(15));

    assert_eq!(job.state(), JobState::Running);
    assert_eq!(h.reactor.spawn_count(), 2);
    assert_ne!(job.pid(), first_pid);
}

#[test]
fn periodic_without_kill_skips_while_running() {
    let mut h = Harness::new();
    let mut job = running_periodic(&mut h, false);

    assert_eq!(job.run_job(&mut h.cx()), Ok(RunOutcome::Skipped));
    assert_eq!(job.state(), JobState::Running);
    assert!(h.reactor.signals.is_empty());
    assert_eq!(h.reactor.spawn_count(), 1);
}

#[test]
fn start_requires_idle() {
    let mut h = Harness::new();
    let mut job = running_periodic(&mut h, false);
    assert!(matches!(
        job.start_job(&mut h.cx()),
        Err(JobError::NotIdle {
            state: JobState::Running,
            ..
        })
    ));
}

#[test]
fn failed_spawn_for_wait_for_exit_arms_a_retry() {
    init_tracing();
    let mut h = Harness::new();
    h.reactor.fail_next_spawns(1);
    let mut job = JobDescriptorBuilder::named("flaky").wait_for_exit(0).build_job();

    job.initialize(&mut h.cx()).unwrap();

    assert_eq!(job.state(), JobState::Idle);
    let timer = h.reactor.timer(job.run_timer().unwrap()).unwrap().clone();
    assert_eq!(timer.first, Duration::from_secs(1));
    assert_eq!(timer.period, None);

    h.fire_run_timer(&mut job);
    assert_eq!(job.state(), JobState::Running);
}

#[test]
fn failed_spawn_for_periodic_waits_for_the_next_tick() {
    let mut h = Harness::new();
    let mut job = JobDescriptorBuilder::named("flaky").periodic(5).build_job();
    job.initialize(&mut h.cx()).unwrap();
    let timer = job.run_timer().unwrap();

    h.reactor.fail_next_spawns(1);
    h.fire_run_timer(&mut job);
    assert_eq!(job.state(), JobState::Idle);
    assert_eq!(job.run_timer(), Some(timer));

    h.fire_run_timer(&mut job);
    assert_eq!(job.state(), JobState::Running);
}

#[test]
fn periodic_schedule_needs_a_period() {
    let desc = JobDescriptorBuilder::named("bad").periodic(0).build();
    assert!(matches!(
        Job::from_descriptor(&desc, JobLimits::default()),
        Err(JobError::InvalidSchedule { .. })
    ));

    let mut h = Harness::new();
    let mut job = JobDescriptorBuilder::named("ok").periodic(5).build_job();
    job.initialize(&mut h.cx()).unwrap();
    assert!(job.set_schedule(ScheduleMode::Periodic, 0, &mut h.cx()).is_err());
    assert_eq!(job.period(), 5);
}

#[test]
fn period_change_resets_the_running_timer() {
    let mut h = Harness::new();
    let mut job = JobDescriptorBuilder::named("uptime").periodic(5).build_job();
    job.initialize(&mut h.cx()).unwrap();
    let timer = job.run_timer().unwrap();

    job.set_schedule(ScheduleMode::Periodic, 30, &mut h.cx()).unwrap();

    assert_eq!(job.run_timer(), Some(timer));
    let every = Duration::from_secs(30);
    assert_eq!(h.reactor.resets, vec![(timer, every, Some(every))]);
}

#[test]
fn schedule_change_during_kill_is_deferred_until_reap() {
    let mut h = Harness::new();
    let mut job = running_periodic(&mut h, false);
    let timer = job.run_timer().unwrap();
    job.kill_job(false, &mut h.cx()).unwrap();

    job.set_schedule(ScheduleMode::Periodic, 60, &mut h.cx()).unwrap();
    assert_eq!(job.period(), 5);
    assert_eq!(job.pending_schedule(), Some((ScheduleMode::Periodic, 60)));
    assert!(h.reactor.resets.is_empty());

    h.exit(&mut job, ExitStatus::Signaled(15));

    assert_eq!(job.period(), 60);
    assert_eq!(job.pending_schedule(), None);
    let every = Duration::from_secs(60);
    assert_eq!(h.reactor.resets, vec![(timer, every, Some(every))]);
}

#[test]
fn switching_to_kill_terminates_and_then_decommissions() {
    let mut h = Harness::new();
    let mut job = running_periodic(&mut h, false);
    let timer = job.run_timer().unwrap();
    let pid = job.pid();

    job.set_schedule(ScheduleMode::Kill, 5, &mut h.cx()).unwrap();
    assert_eq!(job.state(), JobState::TermSent);
    assert!(!h.reactor.is_armed(timer));
    assert_eq!(h.reactor.signals_to(pid), vec![SignalKind::Term]);

    h.exit(&mut job, ExitStatus::Signaled(15));
    assert_eq!(job.state(), JobState::Dead);
    assert!(h.reactor.timers_for("uptime").is_empty());
    assert_eq!(h.reactor.spawn_count(), 1);
}

#[test]
fn decommissioned_job_runs_again_after_switching_back() {
    let mut h = Harness::new();
    let mut job = running_periodic(&mut h, false);
    job.set_schedule(ScheduleMode::Kill, 5, &mut h.cx()).unwrap();
    h.exit(&mut job, ExitStatus::Signaled(15));
    assert_eq!(job.state(), JobState::Dead);

    job.set_schedule(ScheduleMode::WaitForExit, 0, &mut h.cx()).unwrap();

    assert_eq!(job.state(), JobState::Running);
    assert_eq!(h.reactor.spawn_count(), 2);
}

#[test]
fn reconfig_waits_for_the_first_block() {
    init_tracing();
    let mut h = Harness::new();
    let mut job = JobDescriptorBuilder::named("collector")
        .wait_for_exit(0)
        .reconfig(true)
        .build_job();

    assert_eq!(job.reconfig(&mut h.cx()), Ok(ReconfigOutcome::NotRunning));

    job.initialize(&mut h.cx()).unwrap();
    let pid = job.pid();
    assert_eq!(
        job.reconfig(&mut h.cx()),
        Ok(ReconfigOutcome::AwaitingFirstBlock)
    );
    assert!(h.reactor.signals.is_empty());

    h.reactor.push_stdout("ready\n-\n");
    h.pump(&mut job);
    assert_eq!(job.reconfig(&mut h.cx()), Ok(ReconfigOutcome::Signaled));
    assert_eq!(h.reactor.signals_to(pid), vec![SignalKind::Hup]);
}

#[test]
fn reconfig_is_opt_in() {
    let mut h = Harness::new();
    let mut job = running_periodic(&mut h, false);
    h.reactor.push_stdout("x\n-\n");
    h.pump(&mut job);

    assert_eq!(job.reconfig(&mut h.cx()), Ok(ReconfigOutcome::Disabled));
    assert!(h.reactor.signals.is_empty());
}

#[test]
fn eof_closes_only_that_pipe() {
    let mut h = Harness::new();
    let mut job = running_periodic(&mut h, false);
    let spawn = h.reactor.last_spawn().unwrap().clone();

    h.reactor.close_write_end(spawn.stderr);
    h.pump(&mut job);

    assert!(h.reactor.is_pipe_closed(spawn.stderr));
    assert!(!h.reactor.is_pipe_closed(spawn.stdout));
    assert_eq!(job.state(), JobState::Running);
}

#[test]
fn stderr_never_reaches_the_output_sink() {
    let mut h = Harness::new();
    let mut job = running_periodic(&mut h, false);

    h.reactor.push_stderr("warning: disk\n-\n");
    h.pump(&mut job);

    assert!(h.sink.lines.is_empty());
    assert_eq!(job.num_output_blocks(), 0);
}

#[test]
fn shutdown_kills_and_releases_everything() {
    let mut h = Harness::new();
    let mut job = running_periodic(&mut h, false);
    let pid = job.pid();
    let spawn = h.reactor.last_spawn().unwrap().clone();

    job.shutdown(&mut h.cx());

    assert_eq!(job.state(), JobState::Dead);
    assert_eq!(job.pid(), 0);
    assert_eq!(h.reactor.signals_to(pid), vec![SignalKind::Kill]);
    assert!(h.reactor.timers_for("uptime").is_empty());
    assert!(h.reactor.is_pipe_closed(spawn.stdout));
    assert!(h.reactor.is_pipe_closed(spawn.stderr));
}

#[test]
fn stale_timer_ids_are_ignored() {
    let mut h = Harness::new();
    let mut job = JobDescriptorBuilder::named("uptime").periodic(5).build_job();
    job.initialize(&mut h.cx()).unwrap();

    job.on_timer(cronvisor::host::TimerId(9999), &mut h.cx());

    assert_eq!(job.state(), JobState::Idle);
    assert_eq!(h.reactor.spawn_count(), 0);
}
