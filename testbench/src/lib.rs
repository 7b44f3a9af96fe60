//! Scriptable stand-ins for the collaborators of a co-simulation run.
//!
//! Every fake can share a [`Journal`], so tests can assert on the order in
//! which the harness touched the model, checker, trace and platform.

use std::cell::{Cell, RefCell};
use std::io;
use std::rc::Rc;

use difftest::config::LogWindow;
use difftest::regs::{self, RegisterLayout};
use difftest::{
    CommitEvent, DifferentialChecker, HardwareModel, MismatchReport, Pin, Platform,
    ReferenceModel, RegisterVector, TraceRecorder, Verdict,
};

pub const START: u64 = 0x8000_0000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    ResetPulse,
    LogWindow(LogWindow),
    Init { pc: u64 },
    Step { pc: u64 },
    Poll,
    TraceDump(u64),
    TraceClose,
    Abort,
}

#[derive(Debug, Clone, Default)]
pub struct Journal(Rc<RefCell<Vec<Event>>>);

impl Journal {
    pub fn push(&self, event: Event) {
        self.0.borrow_mut().push(event);
    }

    pub fn events(&self) -> Vec<Event> {
        self.0.borrow().clone()
    }

    pub fn count(&self, pred: impl Fn(&Event) -> bool) -> usize {
        self.0.borrow().iter().filter(|e| pred(e)).count()
    }

    pub fn position(&self, event: &Event) -> Option<usize> {
        self.0.borrow().iter().position(|e| e == event)
    }
}

/// Pin values the scripted model shows after a given cycle.
#[derive(Debug, Clone, Default)]
pub struct Frame {
    pub pc: u64,
    pub commit: bool,
    pub inst: u32,
    pub is_mmio: bool,
    pub is_multi_commit: bool,
    pub intr_no: u64,
    pub finish: bool,
    pub gpr: [u64; 32],
}

impl Frame {
    pub fn at(pc: u64) -> Self {
        Self { pc, ..Default::default() }
    }

    pub fn committing(mut self) -> Self {
        self.commit = true;
        self
    }

    pub fn with_gpr(mut self, idx: usize, value: u64) -> Self {
        self.gpr[idx] = value;
        self
    }
}

type Script = Box<dyn Fn(u64) -> Frame>;

/// Hardware model whose difftest port follows a script indexed by the
/// number of rising edges seen outside reset.
pub struct ScriptedModel {
    script: Script,
    clock: bool,
    reset: bool,
    cycle: u64,
    reset_pulses: u64,
    journal: Journal,
}

impl ScriptedModel {
    pub fn new(script: impl Fn(u64) -> Frame + 'static) -> Self {
        Self {
            script: Box::new(script),
            clock: false,
            reset: false,
            cycle: 0,
            reset_pulses: 0,
            journal: Journal::default(),
        }
    }

    pub fn with_journal(mut self, journal: &Journal) -> Self {
        self.journal = journal.clone();
        self
    }

    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    pub fn reset_pulses(&self) -> u64 {
        self.reset_pulses
    }

    fn frame(&self) -> Frame {
        (self.script)(self.cycle)
    }
}

impl HardwareModel for ScriptedModel {
    fn set_clock(&mut self, high: bool) {
        self.clock = high;
    }

    fn set_reset(&mut self, asserted: bool) {
        self.reset = asserted;
    }

    fn eval(&mut self) {
        if !self.clock {
            return;
        }
        if self.reset {
            self.reset_pulses += 1;
            self.journal.push(Event::ResetPulse);
        } else {
            self.cycle += 1;
        }
    }

    fn read_pin(&self, pin: Pin) -> u64 {
        let frame = self.frame();
        match pin {
            Pin::Gpr(idx) => frame.gpr[idx as usize],
            Pin::ThisPc => frame.pc,
            Pin::Commit => frame.commit as u64,
            Pin::ThisInst => frame.inst as u64,
            Pin::IsMmio => frame.is_mmio as u64,
            Pin::IsMultiCommit => frame.is_multi_commit as u64,
            Pin::IntrNo => frame.intr_no,
            Pin::DifftestEnable => 1,
            Pin::Finish => frame.finish as u64,
            _ => 0,
        }
    }

    fn set_log_window(&mut self, window: &LogWindow) {
        self.journal.push(Event::LogWindow(*window));
    }
}

/// Reaches `START` at `start_cycle`, commits once there and never again.
pub fn start_then_hang(start_cycle: u64) -> impl Fn(u64) -> Frame {
    move |cycle| match cycle {
        c if c < start_cycle => Frame::at(0x1000),
        c if c == start_cycle => Frame::at(START).committing(),
        _ => Frame::at(START + 4),
    }
}

/// Shows `START` at cycle 1 without committing, then retires one
/// `addi a0, a0, 1` per cycle.
pub fn counting_loop() -> impl Fn(u64) -> Frame {
    |cycle| match cycle {
        0 => Frame::at(0x1000),
        1 => Frame::at(START),
        c => Frame::at(START + 4 * (c - 2))
            .committing()
            .with_gpr(10, c - 1),
    }
}

/// Checker that logs its calls and fails the `fail_on`-th step.
#[derive(Default)]
pub struct RecordingChecker {
    journal: Journal,
    fail_on: Option<usize>,
    steps: usize,
    inits: usize,
}

impl RecordingChecker {
    pub fn new(journal: &Journal) -> Self {
        Self {
            journal: journal.clone(),
            ..Default::default()
        }
    }

    pub fn failing_on(mut self, step: usize) -> Self {
        self.fail_on = Some(step);
        self
    }

    pub fn steps(&self) -> usize {
        self.steps
    }

    pub fn inits(&self) -> usize {
        self.inits
    }
}

impl DifferentialChecker for RecordingChecker {
    fn init(&mut self, regs: RegisterVector) {
        self.inits += 1;
        self.journal.push(Event::Init { pc: regs.pc() });
    }

    fn step(&mut self, regs: RegisterVector, _event: CommitEvent) -> Verdict {
        self.steps += 1;
        self.journal.push(Event::Step { pc: regs.pc() });
        if self.fail_on == Some(self.steps) {
            Verdict::Fail(MismatchReport::new(regs.pc()))
        } else {
            Verdict::Pass
        }
    }
}

/// Platform whose uptime advances by `tick_ms` on every query.
pub struct FakePlatform {
    journal: Journal,
    now: Cell<u64>,
    tick_ms: u64,
    polls: u64,
    finish_after_polls: Option<u64>,
    aborted: bool,
}

impl FakePlatform {
    pub fn new(journal: &Journal) -> Self {
        Self {
            journal: journal.clone(),
            now: Cell::new(0),
            tick_ms: 1,
            polls: 0,
            finish_after_polls: None,
            aborted: false,
        }
    }

    pub fn with_tick(mut self, tick_ms: u64) -> Self {
        self.tick_ms = tick_ms;
        self
    }

    /// Requests completion once the devices were polled `polls` times.
    pub fn finishing_after(mut self, polls: u64) -> Self {
        self.finish_after_polls = Some(polls);
        self
    }

    pub fn polls(&self) -> u64 {
        self.polls
    }

    pub fn aborted(&self) -> bool {
        self.aborted
    }
}

impl Platform for FakePlatform {
    fn poll_event(&mut self) {
        self.polls += 1;
        self.journal.push(Event::Poll);
    }

    fn uptime(&self) -> u64 {
        let now = self.now.get() + self.tick_ms;
        self.now.set(now);
        now
    }

    fn is_finish(&self) -> bool {
        self.finish_after_polls.is_some_and(|n| self.polls >= n)
    }

    fn set_abort(&mut self) {
        self.aborted = true;
        self.journal.push(Event::Abort);
    }
}

/// Trace recorder that only journals what it is asked to do.
pub struct JournalRecorder {
    journal: Journal,
}

impl JournalRecorder {
    pub fn new(journal: &Journal) -> Self {
        Self {
            journal: journal.clone(),
        }
    }
}

impl<M: ?Sized> TraceRecorder<M> for JournalRecorder {
    fn dump(&mut self, _model: &M, timestamp: u64) -> io::Result<()> {
        self.journal.push(Event::TraceDump(timestamp));
        Ok(())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn close(&mut self) -> io::Result<()> {
        self.journal.push(Event::TraceClose);
        Ok(())
    }
}

/// Reference for [`counting_loop`]: every executed instruction adds one to
/// a0 and four to the PC.
#[derive(Debug, Default, Clone)]
pub struct CountingReference {
    regs: Vec<u64>,
    image: Option<(u64, usize)>,
    executed: u64,
}

impl CountingReference {
    pub fn image(&self) -> Option<(u64, usize)> {
        self.image
    }

    pub fn executed(&self) -> u64 {
        self.executed
    }
}

impl ReferenceModel for CountingReference {
    fn init(&mut self) {
        self.regs = vec![0; RegisterLayout::WithCsrs.len()];
    }

    fn memcpy_from_dut(&mut self, addr: u64, bytes: &[u8]) {
        self.image = Some((addr, bytes.len()));
    }

    fn get_regs(&mut self, regs: &mut RegisterVector) {
        for (idx, slot) in regs.as_mut_slice().iter_mut().enumerate() {
            *slot = self.regs.get(idx).copied().unwrap_or(0);
        }
    }

    fn set_regs(&mut self, regs: &RegisterVector) {
        for (idx, value) in regs.as_slice().iter().enumerate() {
            if let Some(slot) = self.regs.get_mut(idx) {
                *slot = *value;
            }
        }
    }

    fn exec(&mut self, n: u64) {
        for _ in 0..n {
            self.regs[10] += 1;
            self.regs[regs::THIS_PC] += 4;
            self.executed += 1;
        }
    }

    fn raise_intr(&mut self, _no: u64) {
        self.regs[regs::THIS_PC] = START + 0x100;
    }
}
