//! Cycle-loop scenarios
//!
//! Drives the harness with a scripted core, checker and platform and checks
//! reset, start detection, stuck detection, abort ordering and completion.

use anyhow::{Result, bail, ensure};
use difftest::regs::RegisterLayout;
use difftest::{
    ExecutionMode, Harness, HarnessConfig, HarnessError, RunOutcome, Trace, snapshot,
};
use libtest_mimic::{Arguments, Failed, Trial};
use testbench::{
    Event, FakePlatform, Frame, Journal, JournalRecorder, RecordingChecker, START, ScriptedModel,
    counting_loop, start_then_hang,
};

fn main() {
    let args = Arguments::from_args();

    let tests = vec![
        trial("reset_pulses_are_exact", reset_pulses_are_exact),
        trial("no_stall_before_first_commit", no_stall_before_first_commit),
        trial("stall_fires_at_2011", stall_fires_at_2011),
        trial("stall_threshold_override", stall_threshold_override),
        trial("long_boot_does_not_stall", long_boot_does_not_stall),
        trial("stall_after_long_boot_counts_from_start", stall_after_long_boot_counts_from_start),
        trial("mismatch_aborts_after_trace_close", mismatch_aborts_after_trace_close),
        trial("init_once_before_any_step", init_once_before_any_step),
        trial("commits_reach_checker_in_order", commits_reach_checker_in_order),
        trial("snapshot_is_idempotent", snapshot_is_idempotent),
        trial("trace_frames_per_phase", trace_frames_per_phase),
        trial("finish_signal_ends_run", finish_signal_ends_run),
        trial("platform_finish_ends_run", platform_finish_ends_run),
        trial("budget_is_exact", budget_is_exact),
        trial("stress_mode_only_cycles", stress_mode_only_cycles),
        trial("log_window_applied_before_reset", log_window_applied_before_reset),
    ];

    libtest_mimic::run(&args, tests).exit();
}

fn trial(name: &'static str, test: fn() -> Result<()>) -> Trial {
    Trial::test(name, move || -> Result<(), Failed> {
        test().map_err(|e| format!("{e:#}").into())
    })
}

fn config() -> HarnessConfig {
    HarnessConfig {
        layout: RegisterLayout::GprOnly,
        ..HarnessConfig::default()
    }
}

type TestHarness = Harness<ScriptedModel, RecordingChecker, FakePlatform>;

fn harness(
    script: impl Fn(u64) -> Frame + 'static,
    journal: &Journal,
    config: &HarnessConfig,
) -> TestHarness {
    Harness::new(
        ScriptedModel::new(script).with_journal(journal),
        RecordingChecker::new(journal),
        FakePlatform::new(journal),
        config,
    )
}

fn reset_pulses_are_exact() -> Result<()> {
    for n in [0, 1, 10, 37] {
        let journal = Journal::default();
        let config = HarnessConfig {
            reset_cycles: n,
            ..config()
        };
        let harness = harness(counting_loop(), &journal, &config);
        ensure!(harness.model().reset_pulses() == n, "expected {n} reset pulses");
        ensure!(harness.cycles() == 0, "reset pulses must not count as cycles");
        ensure!(harness.model().cycle() == 0, "core left reset early");
    }
    Ok(())
}

fn no_stall_before_first_commit() -> Result<()> {
    let journal = Journal::default();
    let mut harness = harness(|_| Frame::at(0x1000), &journal, &config());
    let outcome = harness.execute_cycles(5)?;
    ensure!(outcome == RunOutcome::BudgetExhausted { cycles: 5 });
    ensure!(!harness.state().has_committed);

    // Even far past the threshold a core that never starts is not stuck.
    let outcome = harness.execute_cycles(10_000)?;
    ensure!(outcome.cycles() == 10_005);
    Ok(())
}

fn stall_fires_at_2011() -> Result<()> {
    let journal = Journal::default();
    let mut harness = harness(start_then_hang(10), &journal, &config());

    match harness.execute_cycles(100_000) {
        Err(HarnessError::Stuck { cycle, last_commit, threshold, pc, .. }) => {
            ensure!(cycle == 2011, "fired at cycle {cycle}");
            ensure!(last_commit == 10);
            ensure!(threshold == 2000);
            ensure!(pc == START + 4);
        }
        other => bail!("expected a stall, got {other:?}"),
    }
    ensure!(harness.checker().inits() == 1);
    ensure!(harness.platform().aborted());
    ensure!(harness.state().aborted);
    ensure!(journal.events().last() == Some(&Event::Abort));
    Ok(())
}

fn stall_threshold_override() -> Result<()> {
    let journal = Journal::default();
    let config = HarnessConfig {
        stuck_threshold: 50,
        ..config()
    };
    let mut harness = harness(start_then_hang(3), &journal, &config);
    let Err(HarnessError::Stuck { cycle, .. }) = harness.execute_cycles(1000) else {
        bail!("expected a stall");
    };
    ensure!(cycle == 54, "fired at cycle {cycle}");
    Ok(())
}

/// `counting_loop` delayed by a boot phase of `boot` cycles.
fn booting_for(boot: u64) -> impl Fn(u64) -> Frame {
    let inner = counting_loop();
    move |cycle| {
        if cycle <= boot {
            Frame::at(0x1000)
        } else {
            inner(cycle - boot)
        }
    }
}

fn long_boot_does_not_stall() -> Result<()> {
    let journal = Journal::default();
    let mut harness = harness(booting_for(3000), &journal, &config());
    let outcome = harness.execute_cycles(10_000)?;
    ensure!(outcome == RunOutcome::BudgetExhausted { cycles: 10_000 });
    ensure!(journal.position(&Event::Init { pc: START }).is_some());
    ensure!(harness.checker().steps() == 10_000 - 3001);
    ensure!(!harness.platform().aborted());
    Ok(())
}

fn stall_after_long_boot_counts_from_start() -> Result<()> {
    let journal = Journal::default();
    let script = |cycle: u64| {
        if cycle <= 2500 {
            Frame::at(0x1000)
        } else {
            Frame::at(START)
        }
    };
    let mut harness = harness(script, &journal, &config());
    match harness.execute_cycles(10_000) {
        Err(HarnessError::Stuck { cycle, last_commit, .. }) => {
            ensure!(last_commit == 2501, "armed at cycle {last_commit}");
            ensure!(cycle == 4502, "fired at cycle {cycle}");
        }
        other => bail!("expected a stall, got {other:?}"),
    }
    Ok(())
}

fn mismatch_aborts_after_trace_close() -> Result<()> {
    let journal = Journal::default();
    let mut harness = Harness::new(
        ScriptedModel::new(counting_loop()).with_journal(&journal),
        RecordingChecker::new(&journal).failing_on(4),
        FakePlatform::new(&journal),
        &config(),
    )
    .with_trace(Trace::<ScriptedModel>::new(Box::new(JournalRecorder::new(&journal))));

    let err = match harness.execute_cycles(1000) {
        Err(err @ HarnessError::Mismatch { .. }) => err,
        other => bail!("expected a mismatch, got {other:?}"),
    };
    let HarnessError::Mismatch { cycle, pc, .. } = err else {
        unreachable!()
    };
    // Commits start at cycle 2, so the fourth one retires at cycle 5.
    ensure!(cycle == 5, "aborted at cycle {cycle}");
    ensure!(pc == START + 12);
    ensure!(harness.cycles() == 5, "kept cycling after the mismatch");
    ensure!(!harness.is_tracing());

    let close = journal.position(&Event::TraceClose);
    let abort = journal.position(&Event::Abort);
    ensure!(close.is_some() && abort.is_some());
    ensure!(close < abort, "trace must close before abort");
    Ok(())
}

fn init_once_before_any_step() -> Result<()> {
    let journal = Journal::default();
    let mut harness = harness(counting_loop(), &journal, &config());
    harness.execute_cycles(50)?;

    let events = journal.events();
    let inits: Vec<usize> = events
        .iter()
        .enumerate()
        .filter(|(_, e)| matches!(e, Event::Init { .. }))
        .map(|(i, _)| i)
        .collect();
    ensure!(inits.len() == 1, "init called {} times", inits.len());
    ensure!(events[inits[0]] == Event::Init { pc: START });
    let first_step = events.iter().position(|e| matches!(e, Event::Step { .. }));
    ensure!(first_step.is_some_and(|s| s > inits[0]));
    ensure!(harness.checker().steps() == 49);
    Ok(())
}

fn commits_reach_checker_in_order() -> Result<()> {
    let journal = Journal::default();
    let mut harness = harness(counting_loop(), &journal, &config());
    harness.execute_cycles(20)?;

    let pcs: Vec<u64> = journal
        .events()
        .into_iter()
        .filter_map(|e| match e {
            Event::Step { pc } => Some(pc),
            _ => None,
        })
        .collect();
    let expected: Vec<u64> = (0..19).map(|i| START + 4 * i).collect();
    ensure!(pcs == expected, "commits out of order: {pcs:x?}");
    ensure!(harness.state().last_commit_cycle == 20);
    Ok(())
}

fn snapshot_is_idempotent() -> Result<()> {
    let journal = Journal::default();
    let mut harness = harness(counting_loop(), &journal, &config());
    harness.execute_cycles(7)?;
    for layout in [RegisterLayout::GprOnly, RegisterLayout::WithCsrs] {
        let first = snapshot::read_registers(harness.model(), layout);
        let second = snapshot::read_registers(harness.model(), layout);
        ensure!(first == second);
        ensure!(first.as_slice().len() == layout.len());
    }
    Ok(())
}

fn trace_frames_per_phase() -> Result<()> {
    let journal = Journal::default();
    let mut harness = harness(counting_loop(), &journal, &config())
        .with_trace(Trace::<ScriptedModel>::new(Box::new(JournalRecorder::new(&journal))));
    harness.execute_cycles(4)?;
    harness.close_trace()?;
    harness.close_trace()?;

    let dumps: Vec<u64> = journal
        .events()
        .into_iter()
        .filter_map(|e| match e {
            Event::TraceDump(t) => Some(t),
            _ => None,
        })
        .collect();
    ensure!(dumps == (0..=8).collect::<Vec<_>>(), "dumps at {dumps:?}");
    ensure!(journal.count(|e| *e == Event::TraceClose) == 1);
    Ok(())
}

fn finish_signal_ends_run() -> Result<()> {
    let journal = Journal::default();
    let script = |cycle| {
        let mut frame = counting_loop()(cycle);
        frame.finish = cycle >= 30;
        frame
    };
    let mut harness = harness(script, &journal, &config());
    let outcome = harness.execute_cycles(1000)?;
    ensure!(outcome == RunOutcome::Finished { cycles: 30 });
    ensure!(!harness.platform().aborted());
    Ok(())
}

fn platform_finish_ends_run() -> Result<()> {
    let journal = Journal::default();
    let mut harness = Harness::new(
        ScriptedModel::new(counting_loop()).with_journal(&journal),
        RecordingChecker::new(&journal),
        FakePlatform::new(&journal).with_tick(50).finishing_after(3),
        &config(),
    );
    let outcome = harness.execute_cycles(1_000_000)?;
    ensure!(matches!(outcome, RunOutcome::Finished { .. }));
    ensure!(harness.platform().polls() == 3);
    Ok(())
}

fn budget_is_exact() -> Result<()> {
    let journal = Journal::default();
    let config = HarnessConfig {
        max_cycles: Some(123),
        ..config()
    };
    let mut harness = harness(counting_loop(), &journal, &config);
    ensure!(harness.max_cycles() == 123);
    let outcome = harness.execute()?;
    ensure!(outcome == RunOutcome::BudgetExhausted { cycles: 123 });
    ensure!(harness.state().max_cycles == 123);
    Ok(())
}

fn stress_mode_only_cycles() -> Result<()> {
    let journal = Journal::default();
    let config = HarnessConfig {
        mode: ExecutionMode::Stress,
        max_cycles: Some(5000),
        ..config()
    };
    let mut harness = Harness::new(
        ScriptedModel::new(start_then_hang(10)).with_journal(&journal),
        RecordingChecker::new(&journal).failing_on(1),
        FakePlatform::new(&journal),
        &config,
    );
    let outcome = harness.execute()?;
    ensure!(outcome == RunOutcome::BudgetExhausted { cycles: 5000 });
    ensure!(harness.checker().inits() == 0 && harness.checker().steps() == 0);
    ensure!(harness.platform().polls() == 0);
    ensure!(!harness.platform().aborted());
    Ok(())
}

fn log_window_applied_before_reset() -> Result<()> {
    let journal = Journal::default();
    let mut config = config();
    config.log.begin = 100;
    config.log.end = 200;
    let _harness = harness(counting_loop(), &journal, &config);

    let events = journal.events();
    ensure!(events.first() == Some(&Event::LogWindow(config.log)));
    ensure!(journal.count(|e| *e == Event::ResetPulse) == 10);
    Ok(())
}
