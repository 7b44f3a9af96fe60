//! Hardware model backed by an arcilator-compiled shared object.
//!
//! Arcilator lowers the design to a flat state buffer plus an `<name>_eval`
//! function; its JSON state file records where every signal lives.

use std::collections::HashMap;
use std::ffi::c_void;

use camino::Utf8Path;
use rand::{Rng, SeedableRng, rngs::StdRng};
use serde::Deserialize;

use super::{HardwareModel, Pin};
use crate::config::LogWindow;
use crate::dylib::Library;
use crate::error::{HarnessError, Result};
use crate::regs::RegisterLayout;
use crate::trace::{WaveSignal, WaveSource};

pub type StateFn = unsafe extern "C" fn(*mut c_void);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StateType {
    Input,
    Output,
    Register,
    Wire,
    Memory,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StateInfo {
    pub name: String,
    pub offset: u32,
    #[serde(rename = "numBits")]
    pub num_bits: u32,
    #[serde(rename = "type")]
    pub ty: StateType,
    #[serde(default)]
    pub stride: Option<u32>,
    #[serde(default)]
    pub depth: Option<u32>,
}

impl StateInfo {
    fn byte_width(&self) -> usize {
        self.num_bits.div_ceil(8) as usize
    }

    fn is_port(&self) -> bool {
        matches!(self.ty, StateType::Input | StateType::Output)
    }
}

/// One model entry of an arcilator `--state-file`.
#[derive(Debug, Clone, Deserialize)]
pub struct ModelDescription {
    pub name: String,
    #[serde(rename = "numStateBytes")]
    pub num_state_bytes: u32,
    #[serde(rename = "initialFnSym", default)]
    pub initial_fn_sym: String,
    #[serde(rename = "finalFnSym", default)]
    pub final_fn_sym: String,
    pub states: Vec<StateInfo>,
}

impl ModelDescription {
    pub fn parse_all(json: &str) -> Result<Vec<Self>> {
        serde_json::from_str(json).map_err(|e| HarnessError::ModelDescription(e.to_string()))
    }

    /// Picks `name` from a state file, or its only/first model.
    pub fn load(path: &Utf8Path, name: Option<&str>) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| HarnessError::ModelDescription(format!("{path}: {e}")))?;
        let mut models = Self::parse_all(&content)?;
        let pos = match name {
            Some(name) => models.iter().position(|m| m.name == name).ok_or_else(|| {
                HarnessError::ModelDescription(format!("{path} has no model named `{name}`"))
            })?,
            None if models.is_empty() => {
                return Err(HarnessError::ModelDescription(format!("{path} lists no models")));
            }
            None => 0,
        };
        Ok(models.swap_remove(pos))
    }

    fn validate(&self) -> Result<()> {
        for state in &self.states {
            let extent = match (state.ty, state.stride, state.depth) {
                (StateType::Memory, Some(stride), Some(depth)) => {
                    stride as usize * depth.saturating_sub(1) as usize + state.byte_width()
                }
                (StateType::Memory, _, _) => {
                    return Err(HarnessError::ModelDescription(format!(
                        "memory `{}` lacks stride or depth",
                        state.name
                    )));
                }
                _ => state.byte_width(),
            };
            if state.offset as usize + extent > self.num_state_bytes as usize {
                return Err(HarnessError::ModelDescription(format!(
                    "state `{}` overruns the {}-byte state buffer",
                    state.name, self.num_state_bytes
                )));
            }
        }
        Ok(())
    }
}

const LOG_BEGIN: &str = "io_logCtrl_log_begin";
const LOG_END: &str = "io_logCtrl_log_end";
const LOG_LEVEL: &str = "io_logCtrl_log_level";

pub struct ArcModel {
    name: String,
    storage: Vec<u8>,
    states: Vec<StateInfo>,
    by_name: HashMap<String, usize>,
    pins: HashMap<Pin, usize>,
    clock: usize,
    reset: usize,
    eval_fn: StateFn,
    // Keeps `eval_fn` mapped; dropped after everything else.
    _library: Option<Library>,
}

impl ArcModel {
    /// Opens `library` and binds it to the model described by `state_file`.
    pub fn load(
        library: &Utf8Path,
        state_file: &Utf8Path,
        model_name: Option<&str>,
        layout: RegisterLayout,
    ) -> Result<Self> {
        let description = ModelDescription::load(state_file, model_name)?;
        let library = Library::open(library)?;

        // SAFETY: arcilator emits `void <name>_eval(void *state)` and an
        // optional `void <initial>(void *state)` with this exact signature.
        let eval_fn = unsafe { library.symbol::<StateFn>(&format!("{}_eval", description.name))? };
        let initial_fn = if description.initial_fn_sym.is_empty() {
            None
        } else {
            Some(unsafe { library.symbol::<StateFn>(&description.initial_fn_sym)? })
        };

        tracing::info!(
            model = %description.name,
            library = %library.path(),
            "loaded arcilator model"
        );
        unsafe { Self::with_functions(description, layout, eval_fn, initial_fn, Some(library)) }
    }

    /// Builds a model around already-resolved state functions.
    ///
    /// # Safety
    ///
    /// `eval_fn` and `initial_fn` must only access the first
    /// `description.num_state_bytes` bytes of the buffer they are given, and
    /// must remain valid for the lifetime of the model (for functions from a
    /// shared object, pass the owning `library`).
    pub unsafe fn with_functions(
        description: ModelDescription,
        layout: RegisterLayout,
        eval_fn: StateFn,
        initial_fn: Option<StateFn>,
        library: Option<Library>,
    ) -> Result<Self> {
        description.validate()?;

        let by_name: HashMap<String, usize> = description
            .states
            .iter()
            .enumerate()
            .filter(|(_, state)| state.is_port())
            .map(|(idx, state)| (state.name.clone(), idx))
            .collect();
        let require = |name: &str| {
            by_name
                .get(name)
                .copied()
                .ok_or_else(|| HarnessError::MissingSignal(name.to_owned()))
        };

        let clock = require("clock")?;
        let reset = require("reset")?;
        for pin in Pin::required(layout) {
            require(&pin.signal_name())?;
        }

        let pins = ALL_OPTIONAL_PINS
            .iter()
            .copied()
            .chain(Pin::required(layout))
            .filter_map(|pin| by_name.get(pin.signal_name().as_ref()).map(|&idx| (pin, idx)))
            .collect();

        let mut storage = vec![0u8; description.num_state_bytes as usize];
        if let Some(initial) = initial_fn {
            unsafe { initial(storage.as_mut_ptr().cast()) };
        }

        Ok(Self {
            name: description.name,
            storage,
            states: description.states,
            by_name,
            pins,
            clock,
            reset,
            eval_fn,
            _library: library,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> &[u8] {
        &self.storage
    }

    /// Fills register state with seeded noise, mimicking an unknown power-on
    /// state. Ports and memories are left untouched.
    pub fn randomize(&mut self, seed: u64) {
        let mut rng = StdRng::seed_from_u64(seed);
        for state in self.states.iter().filter(|s| s.ty == StateType::Register) {
            let start = state.offset as usize;
            let end = start + state.byte_width();
            rng.fill(&mut self.storage[start..end]);
            mask_top_byte(&mut self.storage[start..end], state.num_bits);
        }
    }

    /// Copies `bytes` into memory state `memory`, whose element 0 sits at
    /// address `base`. `addr` must be element aligned.
    pub fn load_memory(&mut self, memory: &str, base: u64, addr: u64, bytes: &[u8]) -> Result<()> {
        let state = self
            .states
            .iter()
            .find(|s| s.ty == StateType::Memory && s.name == memory)
            .ok_or_else(|| HarnessError::MissingSignal(memory.to_owned()))?;
        let elem = state.byte_width();
        let (stride, depth) = (
            state.stride.unwrap_or(elem as u32) as usize,
            state.depth.unwrap_or(0) as u64,
        );

        let Some(first) = addr.checked_sub(base) else {
            return Err(HarnessError::Image(format!(
                "address 0x{addr:x} is below memory base 0x{base:x}"
            )));
        };
        if first % elem as u64 != 0 {
            return Err(HarnessError::Image(format!(
                "address 0x{addr:x} is not {elem}-byte aligned"
            )));
        }
        let first = first / elem as u64;
        let count = bytes.len().div_ceil(elem) as u64;
        if first + count > depth {
            return Err(HarnessError::Image(format!(
                "{} bytes at 0x{addr:x} do not fit in `{memory}` ({depth} x {elem} bytes)",
                bytes.len()
            )));
        }

        for (i, chunk) in bytes.chunks(elem).enumerate() {
            let offset = state.offset as usize + (first as usize + i) * stride;
            self.storage[offset..offset + chunk.len()].copy_from_slice(chunk);
        }
        tracing::debug!(
            memory,
            addr = format_args!("0x{addr:x}"),
            len = bytes.len(),
            "loaded memory"
        );
        Ok(())
    }

    fn read_state(&self, idx: usize) -> u64 {
        let state = &self.states[idx];
        let start = state.offset as usize;
        let width = state.byte_width().min(8);
        let mut raw = [0u8; 8];
        raw[..width].copy_from_slice(&self.storage[start..start + width]);
        let value = u64::from_le_bytes(raw);
        if state.num_bits >= 64 {
            value
        } else {
            value & ((1u64 << state.num_bits) - 1)
        }
    }

    fn write_state(&mut self, idx: usize, value: u64) {
        let state = &self.states[idx];
        let start = state.offset as usize;
        let width = state.byte_width().min(8);
        self.storage[start..start + width].copy_from_slice(&value.to_le_bytes()[..width]);
        mask_top_byte(&mut self.storage[start..start + width], state.num_bits);
    }

    fn write_named(&mut self, name: &str, value: u64) {
        if let Some(&idx) = self.by_name.get(name) {
            self.write_state(idx, value);
        }
    }
}

const ALL_OPTIONAL_PINS: [Pin; 9] = [
    Pin::ThisInst,
    Pin::IsMmio,
    Pin::IsRvc,
    Pin::IsRvc2,
    Pin::IntrNo,
    Pin::PrivilegeMode,
    Pin::IsMultiCommit,
    Pin::DifftestEnable,
    Pin::Finish,
];

fn mask_top_byte(bytes: &mut [u8], num_bits: u32) {
    let rem = num_bits % 8;
    if rem != 0 && bytes.len() == num_bits.div_ceil(8) as usize {
        if let Some(last) = bytes.last_mut() {
            *last &= (1u8 << rem) - 1;
        }
    }
}

impl HardwareModel for ArcModel {
    fn set_clock(&mut self, high: bool) {
        self.write_state(self.clock, high as u64);
    }

    fn set_reset(&mut self, asserted: bool) {
        self.write_state(self.reset, asserted as u64);
    }

    fn eval(&mut self) {
        // SAFETY: the buffer is `num_state_bytes` long, as the contract of
        // `with_functions` requires.
        unsafe { (self.eval_fn)(self.storage.as_mut_ptr().cast()) }
    }

    fn read_pin(&self, pin: Pin) -> u64 {
        match self.pins.get(&pin) {
            Some(&idx) => self.read_state(idx),
            // Cores without a difftest control port always want checking.
            None if pin == Pin::DifftestEnable => 1,
            None => 0,
        }
    }

    fn set_log_window(&mut self, window: &LogWindow) {
        self.write_named(LOG_BEGIN, window.begin);
        self.write_named(LOG_END, window.end);
        self.write_named(LOG_LEVEL, window.level as u64);
    }
}

impl WaveSource for ArcModel {
    fn wave_signals(&self) -> Vec<WaveSignal> {
        self.states
            .iter()
            .filter(|s| s.is_port())
            .map(|s| WaveSignal {
                name: s.name.clone(),
                width: s.num_bits.min(64),
            })
            .collect()
    }

    fn wave_values(&self, out: &mut Vec<u64>) {
        out.clear();
        out.extend(
            self.states
                .iter()
                .enumerate()
                .filter(|(_, s)| s.is_port())
                .map(|(idx, _)| self.read_state(idx)),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // clock@0 reset@1 commit@2 pc@8 counter@16 r_*@24.. mem@320
    const PC: usize = 8;
    const COUNTER: usize = 16;

    fn description() -> ModelDescription {
        let mut states = vec![
            port("clock", 0, 1, StateType::Input),
            port("reset", 1, 1, StateType::Input),
            port("io_difftest_commit", 2, 1, StateType::Output),
            port("io_difftest_thisPC", PC as u32, 64, StateType::Output),
            port("io_logCtrl_log_level", 3, 8, StateType::Input),
            StateInfo {
                name: "core/counter".into(),
                offset: COUNTER as u32,
                num_bits: 12,
                ty: StateType::Register,
                stride: None,
                depth: None,
            },
            StateInfo {
                name: "mem_ext".into(),
                offset: 320,
                num_bits: 32,
                ty: StateType::Memory,
                stride: Some(4),
                depth: Some(16),
            },
        ];
        for i in 0..32u32 {
            states.push(port(&format!("io_difftest_r_{i}"), 24 + i * 8, 64, StateType::Output));
        }
        ModelDescription {
            name: "TestCore".into(),
            num_state_bytes: 384,
            initial_fn_sym: String::new(),
            final_fn_sym: String::new(),
            states,
        }
    }

    fn port(name: &str, offset: u32, num_bits: u32, ty: StateType) -> StateInfo {
        StateInfo {
            name: name.into(),
            offset,
            num_bits,
            ty,
            stride: None,
            depth: None,
        }
    }

    /// Rising clock edge with reset low: pc += 4, commit = 1.
    unsafe extern "C" fn eval(state: *mut c_void) {
        let buf = unsafe { std::slice::from_raw_parts_mut(state.cast::<u8>(), 384) };
        let prev_clock = buf[COUNTER + 4];
        let clock = buf[0];
        if prev_clock == 0 && clock == 1 {
            let pc = u64::from_le_bytes(buf[PC..PC + 8].try_into().unwrap());
            let next = if buf[1] == 1 { 0x8000_0000 } else { pc + 4 };
            buf[PC..PC + 8].copy_from_slice(&next.to_le_bytes());
            buf[2] = (buf[1] == 0) as u8;
        }
        buf[COUNTER + 4] = clock;
    }

    fn model(layout: RegisterLayout) -> Result<ArcModel> {
        unsafe { ArcModel::with_functions(description(), layout, eval, None, None) }
    }

    #[test]
    fn parses_state_file() {
        let json = r#"[{"name": "Top", "numStateBytes": 8, "states": [
            {"name": "clock", "offset": 0, "numBits": 1, "type": "input"},
            {"name": "mem", "offset": 4, "numBits": 8, "type": "memory", "stride": 1, "depth": 4}
        ]}]"#;
        let models = ModelDescription::parse_all(json).unwrap();
        assert_eq!(models[0].name, "Top");
        assert_eq!(models[0].states[1].ty, StateType::Memory);
        assert!(models[0].validate().is_ok());
    }

    #[test]
    fn rejects_overrunning_state() {
        let mut desc = description();
        desc.num_state_bytes = 100;
        assert!(matches!(desc.validate(), Err(HarnessError::ModelDescription(_))));
    }

    #[test]
    fn csr_layout_requires_csr_pins() {
        assert!(model(RegisterLayout::GprOnly).is_ok());
        match model(RegisterLayout::WithCsrs) {
            Err(HarnessError::MissingSignal(name)) => assert_eq!(name, "io_difftest_mstatus"),
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("csr pins are missing"),
        }
    }

    #[test]
    fn clocks_through_eval() {
        let mut dut = model(RegisterLayout::GprOnly).unwrap();
        dut.set_reset(true);
        dut.set_clock(false);
        dut.eval();
        dut.set_clock(true);
        dut.eval();
        dut.set_reset(false);
        assert_eq!(dut.read_pin(Pin::ThisPc), 0x8000_0000);
        assert_eq!(dut.read_pin(Pin::Commit), 0);

        dut.set_clock(false);
        dut.eval();
        dut.set_clock(true);
        dut.eval();
        assert_eq!(dut.read_pin(Pin::ThisPc), 0x8000_0004);
        assert_eq!(dut.read_pin(Pin::Commit), 1);
    }

    #[test]
    fn absent_pins_have_defaults() {
        let dut = model(RegisterLayout::GprOnly).unwrap();
        assert_eq!(dut.read_pin(Pin::DifftestEnable), 1);
        assert_eq!(dut.read_pin(Pin::Finish), 0);
        assert_eq!(dut.read_pin(Pin::IntrNo), 0);
    }

    #[test]
    fn loads_memory_words() {
        let mut dut = model(RegisterLayout::GprOnly).unwrap();
        dut.load_memory("mem_ext", 0x8000_0000, 0x8000_0004, &[0x13, 0, 0, 0, 0x6f])
            .unwrap();
        assert_eq!(&dut.state()[324..328], &[0x13, 0, 0, 0]);
        assert_eq!(dut.state()[328], 0x6f);

        assert!(dut.load_memory("mem_ext", 0x8000_0000, 0x8000_0040, &[0; 4]).is_err());
        assert!(dut.load_memory("mem_ext", 0x8000_0000, 0x7fff_fffc, &[0; 4]).is_err());
        assert!(dut.load_memory("rom", 0x8000_0000, 0x8000_0000, &[0; 4]).is_err());
    }

    #[test]
    fn randomize_is_seeded_and_masked() {
        let mut a = model(RegisterLayout::GprOnly).unwrap();
        let mut b = model(RegisterLayout::GprOnly).unwrap();
        a.randomize(7);
        b.randomize(7);
        assert_eq!(a.state(), b.state());
        assert_eq!(a.state()[COUNTER + 1] & 0xf0, 0);
        assert_eq!(a.read_pin(Pin::ThisPc), 0);
    }

    #[test]
    fn log_window_drives_level_port() {
        let mut dut = model(RegisterLayout::GprOnly).unwrap();
        dut.set_log_window(&LogWindow {
            begin: 10,
            end: 20,
            level: crate::config::LogLevel::Warn,
        });
        assert_eq!(dut.state()[3], crate::config::LogLevel::Warn as u8);
    }

    #[test]
    fn exposes_ports_as_waves() {
        let dut = model(RegisterLayout::GprOnly).unwrap();
        let signals = dut.wave_signals();
        assert_eq!(signals.len(), 5 + 32);
        assert!(signals.iter().all(|s| s.name != "core/counter"));
        let mut values = Vec::new();
        dut.wave_values(&mut values);
        assert_eq!(values.len(), signals.len());
    }
}
