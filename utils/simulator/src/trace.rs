//! Waveform capture for the clock driver.

use std::cell::RefCell;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::rc::Rc;

use camino::Utf8Path;
use vcd_ng::{IdCode, SimulationCommand, TimescaleUnit, Value, VecValue, Writer};

/// A traced signal of a [`WaveSource`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaveSignal {
    pub name: String,
    pub width: u32,
}

/// A model whose signals can be recorded into a waveform.
pub trait WaveSource {
    fn wave_signals(&self) -> Vec<WaveSignal>;

    /// Current values, in [`wave_signals`](Self::wave_signals) order.
    fn wave_values(&self, out: &mut Vec<u64>);
}

pub trait TraceRecorder<M: ?Sized> {
    fn dump(&mut self, model: &M, timestamp: u64) -> io::Result<()>;

    fn flush(&mut self) -> io::Result<()>;

    fn close(&mut self) -> io::Result<()>;
}

/// Owns a recorder and the simulation time it is stamped with.
pub struct Trace<M: ?Sized> {
    recorder: Box<dyn TraceRecorder<M>>,
    time: u64,
    primed: bool,
    closed: bool,
}

impl<M: ?Sized> Trace<M> {
    pub fn new(recorder: Box<dyn TraceRecorder<M>>) -> Self {
        Self {
            recorder,
            time: 0,
            primed: false,
            closed: false,
        }
    }

    /// Records the state before the first evaluation. Only the first call
    /// has an effect.
    pub fn prime(&mut self, model: &M) -> io::Result<()> {
        if self.primed || self.closed {
            return Ok(());
        }
        self.primed = true;
        self.recorder.dump(model, self.time)?;
        self.recorder.flush()
    }

    /// Advances time by one phase and records it.
    pub fn advance(&mut self, model: &M) -> io::Result<()> {
        if self.closed {
            return Ok(());
        }
        self.time += 1;
        self.recorder.dump(model, self.time)?;
        self.recorder.flush()
    }

    pub fn time(&self) -> u64 {
        self.time
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn close(&mut self) -> io::Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.recorder.close()
    }
}

/// `Write` handle that can be flushed from outside the VCD writer.
struct SharedSink<W>(Rc<RefCell<W>>);

impl<W: Write> Write for SharedSink<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.borrow_mut().write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0.borrow_mut().flush()
    }
}

/// Value-change-dump recorder for any [`WaveSource`].
pub struct VcdRecorder<W: Write> {
    writer: Writer<SharedSink<W>>,
    sink: Rc<RefCell<W>>,
    ids: Vec<(IdCode, u32)>,
    last: Vec<u64>,
    values: Vec<u64>,
    dumped: bool,
    closed: bool,
}

impl VcdRecorder<BufWriter<File>> {
    pub fn create<M: WaveSource + ?Sized>(path: &Utf8Path, model: &M) -> io::Result<Self> {
        let file = File::create(path)?;
        tracing::info!(%path, "enabling waves");
        Self::new(Rc::new(RefCell::new(BufWriter::new(file))), "TOP", model)
    }
}

impl<W: Write> VcdRecorder<W> {
    /// Writes the VCD header for `model`'s signals under `scope`.
    pub fn new<M: WaveSource + ?Sized>(
        sink: Rc<RefCell<W>>,
        scope: &str,
        model: &M,
    ) -> io::Result<Self> {
        let mut writer = Writer::new(SharedSink(sink.clone()));
        writer.timescale(1, TimescaleUnit::NS)?;
        writer.add_module(scope)?;
        let ids = model
            .wave_signals()
            .iter()
            .map(|signal| {
                let width = signal.width.max(1);
                writer
                    .add_wire(width, &signal.name.replace('/', "."))
                    .map(|id| (id, width))
            })
            .collect::<io::Result<Vec<_>>>()?;
        writer.upscope()?;
        writer.enddefinitions()?;

        Ok(Self {
            writer,
            sink,
            last: vec![0; ids.len()],
            values: Vec::with_capacity(ids.len()),
            ids,
            dumped: false,
            closed: false,
        })
    }

    fn write_value(&mut self, idx: usize) -> io::Result<()> {
        let (id, width) = self.ids[idx];
        let value = self.values[idx];
        if width == 1 {
            self.writer.change_scalar(id, bit(value, 0))
        } else {
            // Most significant bit first.
            let mut bits = VecValue::repeat(Value::V0, width as usize);
            for i in 0..width {
                bits.set_bit(i as usize, bit(value, width - 1 - i));
            }
            self.writer.change_vector(id, &bits)
        }
    }
}

fn bit(value: u64, idx: u32) -> Value {
    if (value >> idx) & 1 == 1 { Value::V1 } else { Value::V0 }
}

impl<M: WaveSource + ?Sized, W: Write> TraceRecorder<M> for VcdRecorder<W> {
    fn dump(&mut self, model: &M, timestamp: u64) -> io::Result<()> {
        if self.closed {
            return Ok(());
        }
        model.wave_values(&mut self.values);
        if self.values.len() != self.ids.len() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "model reported {} values for {} traced signals",
                    self.values.len(),
                    self.ids.len()
                ),
            ));
        }

        self.writer.timestamp(timestamp)?;
        if !self.dumped {
            self.dumped = true;
            self.writer.begin(SimulationCommand::Dumpvars)?;
            for idx in 0..self.ids.len() {
                self.write_value(idx)?;
            }
            self.writer.end()?;
        } else {
            for idx in 0..self.ids.len() {
                if self.values[idx] != self.last[idx] {
                    self.write_value(idx)?;
                }
            }
        }
        self.last.copy_from_slice(&self.values);
        Ok(())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.sink.borrow_mut().flush()
    }

    fn close(&mut self) -> io::Result<()> {
        self.closed = true;
        self.sink.borrow_mut().flush()
    }
}
