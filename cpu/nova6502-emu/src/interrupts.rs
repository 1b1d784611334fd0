use crate::pins::PinWord;
use bincode::{Decode, Encode};

pub const NMI_VECTOR: u16 = 0xFFFA;
pub const RESET_VECTOR: u16 = 0xFFFC;
pub const IRQ_VECTOR: u16 = 0xFFFE;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub enum InterruptSource {
    Brk,
    Irq,
    Nmi,
    Reset,
}

impl InterruptSource {
    #[must_use]
    pub fn vector(self) -> u16 {
        match self {
            Self::Brk | Self::Irq => IRQ_VECTOR,
            Self::Nmi => NMI_VECTOR,
            Self::Reset => RESET_VECTOR,
        }
    }
}

/// Tracks the RESET/NMI/IRQ inputs between instruction boundaries.
///
/// NMI and RESET latch on the transition from released to asserted. IRQ is level-sensitive and
/// only counts while it is asserted at the moment the lines are polled.
#[derive(Debug, Clone, Default, PartialEq, Eq, Encode, Decode)]
pub struct InterruptLines {
    nmi_line: bool,
    nmi_triggered: bool,
    irq_line: bool,
    res_line: bool,
    reset_pending: bool,
    interrupt_polled: bool,
}

impl InterruptLines {
    /// Lines at power-on; a RESET is pending so that the CPU loads the RESET vector first.
    #[must_use]
    pub fn power_on() -> Self {
        Self { reset_pending: true, ..Self::default() }
    }

    /// Latch the input lines from the current pin word.
    pub fn sample(&mut self, pins: PinWord) {
        let nmi = pins.nmi();
        if nmi && !self.nmi_line {
            log::trace!("NMI edge detected");
            self.nmi_triggered = true;
        }
        self.nmi_line = nmi;

        let res = pins.res();
        if res && !self.res_line {
            log::trace!("RESET edge detected");
            self.reset_pending = true;
        }
        self.res_line = res;

        self.irq_line = pins.irq();
    }

    /// Decide whether an interrupt should be taken at the next instruction boundary.
    ///
    /// Each poll replaces the previous result, so the poll made when an instruction issues its
    /// final bus cycle is the one that counts.
    pub fn poll(&mut self, interrupt_disable: bool) {
        self.interrupt_polled = self.nmi_triggered || (self.irq_line && !interrupt_disable);
    }

    /// Called at an instruction boundary. RESET beats NMI beats IRQ.
    pub fn take_pending(&mut self) -> Option<InterruptSource> {
        if self.reset_pending {
            self.reset_pending = false;
            self.interrupt_polled = false;
            return Some(InterruptSource::Reset);
        }

        if !self.interrupt_polled {
            return None;
        }

        self.interrupt_polled = false;
        Some(if self.nmi_triggered { InterruptSource::Nmi } else { InterruptSource::Irq })
    }

    /// Consume a latched NMI edge, if any. Used when the interrupt vector is chosen, which lets a
    /// late NMI take over a BRK or IRQ sequence.
    pub fn acknowledge_nmi(&mut self) -> bool {
        std::mem::take(&mut self.nmi_triggered)
    }

    /// Force a RESET at the next boundary, as if the RES line had been pulsed.
    pub fn request_reset(&mut self) {
        self.reset_pending = true;
    }

    pub fn clear(&mut self) {
        self.nmi_triggered = false;
        self.reset_pending = false;
        self.interrupt_polled = false;
    }

    #[must_use]
    pub fn reset_pending(&self) -> bool {
        self.reset_pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pins;
    use test_log::test;

    fn lines(mask: u64) -> PinWord {
        PinWord::default().with_line(mask, true)
    }

    #[test]
    fn power_on_reset() {
        let mut interrupts = InterruptLines::power_on();
        assert_eq!(interrupts.take_pending(), Some(InterruptSource::Reset));
        assert_eq!(interrupts.take_pending(), None);
    }

    #[test]
    fn nmi_is_edge_triggered() {
        let mut interrupts = InterruptLines::default();

        interrupts.sample(lines(pins::NMI));
        interrupts.poll(true);
        assert_eq!(interrupts.take_pending(), Some(InterruptSource::Nmi));
        assert!(interrupts.acknowledge_nmi());

        // Line held; no new edge
        interrupts.sample(lines(pins::NMI));
        interrupts.poll(true);
        assert_eq!(interrupts.take_pending(), None);

        interrupts.sample(PinWord::default());
        interrupts.sample(lines(pins::NMI));
        interrupts.poll(false);
        assert_eq!(interrupts.take_pending(), Some(InterruptSource::Nmi));
    }

    #[test]
    fn irq_is_level_triggered_and_masked() {
        let mut interrupts = InterruptLines::default();

        interrupts.sample(lines(pins::IRQ));
        interrupts.poll(true);
        assert_eq!(interrupts.take_pending(), None);

        interrupts.poll(false);
        assert_eq!(interrupts.take_pending(), Some(InterruptSource::Irq));

        // Still asserted, so it is taken again
        interrupts.poll(false);
        assert_eq!(interrupts.take_pending(), Some(InterruptSource::Irq));

        interrupts.sample(PinWord::default());
        interrupts.poll(false);
        assert_eq!(interrupts.take_pending(), None);
    }

    #[test]
    fn priority() {
        let mut interrupts = InterruptLines::default();

        interrupts.sample(lines(pins::IRQ | pins::NMI));
        interrupts.poll(false);
        assert_eq!(interrupts.take_pending(), Some(InterruptSource::Nmi));

        interrupts.sample(lines(pins::IRQ | pins::NMI | pins::RES));
        interrupts.poll(false);
        assert_eq!(interrupts.take_pending(), Some(InterruptSource::Reset));
    }

    #[test]
    fn later_poll_replaces_earlier() {
        let mut interrupts = InterruptLines::default();

        interrupts.sample(lines(pins::IRQ));
        interrupts.poll(false);
        interrupts.sample(PinWord::default());
        interrupts.poll(false);
        assert_eq!(interrupts.take_pending(), None);
    }
}
