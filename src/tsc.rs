use std::fmt;

/// Identifies the execution unit (socket and core) that produced a counter
/// reading. Linux writes the topology word into IA32_TSC_AUX at boot: the
/// node number in bits 12..24 and the CPU number in the low 12 bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnitId {
    pub socket: u32,
    pub core: u32,
}

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "socket {} core {}", self.socket, self.core)
    }
}

/// A single timestamp counter reading paired with the unit that produced it.
#[derive(Debug, Clone, Copy)]
pub struct CycleSample {
    pub value: u64,
    pub unit: UnitId,
}

fn decode_aux(aux: u32) -> UnitId {
    UnitId {
        socket: (aux & 0xFFF000) >> 12,
        core: aux & 0xFFF,
    }
}

// ---------------------------------------------------------------------------
// x86_64 implementation
// ---------------------------------------------------------------------------

#[cfg(target_arch = "x86_64")]
mod x86 {
    use core::arch::asm;
    use core::arch::x86_64::__rdtscp;
    use core::sync::atomic::{AtomicU8, Ordering};

    use super::{decode_aux, CycleSample};

    // 0 = unchecked, 1 = absent, 2 = present
    static RDTSCP_SUPPORT: AtomicU8 = AtomicU8::new(0);

    /// Checks CPUID leaf 0x8000_0001, EDX bit 27 for RDTSCP support.
    pub fn has_rdtscp() -> bool {
        let cached = RDTSCP_SUPPORT.load(Ordering::Relaxed);
        if cached != 0 {
            return cached == 2;
        }

        // SAFETY: CPUID is always available on x86_64.
        let edx: u32;
        unsafe {
            asm!(
                "push rbx",       // rbx is callee-saved
                "mov eax, 0x80000001",
                "cpuid",
                "mov {edx:e}, edx",
                "pop rbx",
                edx = out(reg) edx,
                out("eax") _,
                out("ecx") _,
                out("edx") _,
            );
        }

        let present = (edx >> 27) & 1 == 1;
        RDTSCP_SUPPORT.store(if present { 2 } else { 1 }, Ordering::Relaxed);
        present
    }

    /// Reads the TSC and the IA32_TSC_AUX topology word in one instruction,
    /// so the cycle value and the unit identifiers are mutually consistent
    /// even if the thread migrates between consecutive reads.
    pub fn read_cycle_sample() -> CycleSample {
        let mut aux: u32 = 0;
        // SAFETY: callers gate on has_rdtscp(); RDTSCP has no memory operands.
        let value = unsafe { __rdtscp(&mut aux) };
        CycleSample {
            value,
            unit: decode_aux(aux),
        }
    }
}

/// True when the current CPU can produce consistent cycle samples.
pub fn is_supported() -> bool {
    #[cfg(target_arch = "x86_64")]
    {
        x86::has_rdtscp()
    }
    #[cfg(not(target_arch = "x86_64"))]
    {
        false
    }
}

/// Takes one cycle sample.
///
/// Callers must gate on [`is_supported`] before the first read: on a CPU
/// without RDTSCP, startup fails and this is never reached. The non-x86_64
/// stub exists only so the crate compiles there; it returns a zeroed sample.
pub fn read() -> CycleSample {
    #[cfg(target_arch = "x86_64")]
    {
        x86::read_cycle_sample()
    }
    #[cfg(not(target_arch = "x86_64"))]
    {
        CycleSample {
            value: 0,
            unit: UnitId { socket: 0, core: 0 },
        }
    }
}
