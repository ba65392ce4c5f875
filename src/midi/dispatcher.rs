//! The dispatcher: handler registries and the RPN/NRPN state machines.
//!
//! Handlers are registered at configuration time and invoked during
//! dispatch:
//!
//! - a 128-entry status-byte table (channel messages registered with a
//!   channel mask expand across the matching entries, so a handler is never
//!   invoked for a channel outside its mask);
//! - a per-timbre 128-entry control-change table;
//! - an RPN handler array and an NRPN handler map, fed by the per-channel
//!   RPN/NRPN state machine.
//!
//! The state machine latches RPN and NRPN selections independently; data
//! entry and data increment/decrement apply to whichever is active, with
//! RP-018 semantics for the increment flavors.

use super::defs::{cc, status, CC_COUNT, CHANNEL_COUNT, MAX_NRPNS, MAX_RPNS};
use super::layering::{ChannelMask, Layering, TimbreMask};
use super::message::{SmallMessage, SysexMessage};
use super::param::{rpn, ParameterNumber, ParameterValue};
use crate::defs::MAX_TIMBRALITY;
use std::collections::BTreeMap;

pub type SmallHandler = Box<dyn FnMut(&SmallMessage)>;
pub type XrpnHandler = Box<dyn FnMut(u8, ParameterNumber, ParameterValue)>;
pub type SysexHandler = Box<dyn FnMut(&SysexMessage)>;

/// Which parameter family a channel's data entry currently addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum XrpnState {
    #[default]
    Inactive,
    RpnActive,
    NrpnActive,
}

/// Per-channel latched parameter selection.
#[derive(Default)]
struct ChannelState {
    state: XrpnState,
    rpn_msb: Option<u8>,
    rpn_lsb: Option<u8>,
    nrpn_msb: Option<u8>,
    nrpn_lsb: Option<u8>,
}

impl ChannelState {
    fn reset(&mut self) {
        *self = Self::default();
    }

    fn active_number(&self) -> Option<(XrpnState, ParameterNumber)> {
        match self.state {
            XrpnState::Inactive => None,
            XrpnState::RpnActive => Some((
                XrpnState::RpnActive,
                ParameterNumber::new(self.rpn_msb?, self.rpn_lsb?),
            )),
            XrpnState::NrpnActive => Some((
                XrpnState::NrpnActive,
                ParameterNumber::new(self.nrpn_msb?, self.nrpn_lsb?),
            )),
        }
    }
}

/// Per-channel values and per-timbre handlers for one parameter.
struct XrpnBundle {
    values: [ParameterValue; CHANNEL_COUNT],
    handlers: [Option<XrpnHandler>; MAX_TIMBRALITY],
}

impl XrpnBundle {
    fn new() -> Self {
        Self {
            values: [ParameterValue::default(); CHANNEL_COUNT],
            handlers: std::array::from_fn(|_| None),
        }
    }

    /// Invoke the handlers of every timbre in the mask, once the value is
    /// complete.
    fn broadcast(&mut self, timbres: TimbreMask, channel: u8, number: ParameterNumber) {
        let value = self.values[channel as usize];
        if !value.is_valid() {
            return;
        }
        for (ti, handler) in self.handlers.iter_mut().enumerate() {
            if timbres & (1 << ti) != 0 {
                if let Some(h) = handler {
                    h(channel, number, value);
                }
            }
        }
    }
}

struct TimbreHandlers {
    cc: [Option<SmallHandler>; CC_COUNT],
}

impl TimbreHandlers {
    fn new() -> Self {
        Self {
            cc: std::array::from_fn(|_| None),
        }
    }
}

pub struct Dispatcher {
    status_handlers: [Option<SmallHandler>; 128],
    timbres: [TimbreHandlers; MAX_TIMBRALITY],
    rpns: [XrpnBundle; MAX_RPNS],
    nrpns: BTreeMap<ParameterNumber, XrpnBundle>,
    channels: [ChannelState; CHANNEL_COUNT],
    sysex_handlers: Vec<SysexHandler>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self {
            status_handlers: std::array::from_fn(|_| None),
            timbres: std::array::from_fn(|_| TimbreHandlers::new()),
            rpns: std::array::from_fn(|_| XrpnBundle::new()),
            nrpns: BTreeMap::new(),
            channels: std::array::from_fn(|_| ChannelState::default()),
            sysex_handlers: Vec::new(),
        }
    }

    /// Reset the per-channel RPN/NRPN state machines.
    pub fn reset(&mut self) {
        for c in &mut self.channels {
            c.reset();
        }
    }

    /// Register a channel-message handler for the channels in `mask`. The
    /// handler occupies one table entry per channel, so it can never fire
    /// for a channel outside the mask.
    pub fn register_status_handler(
        &mut self,
        status: u8,
        mask: ChannelMask,
        handler: SmallHandler,
    ) {
        debug_assert!(status & 0x80 != 0 && status & 0xF0 != 0xF0);
        let handler = std::rc::Rc::new(std::cell::RefCell::new(handler));
        for ch in 0..CHANNEL_COUNT as u8 {
            if mask & (1 << ch) != 0 {
                let index = ((status + ch) & 0x7F) as usize;
                assert!(
                    self.status_handlers[index].is_none(),
                    "status handler already registered"
                );
                let h = handler.clone();
                self.status_handlers[index] = Some(Box::new(move |msg| {
                    let mut shared = h.borrow_mut();
                    (*shared)(msg)
                }));
            }
        }
    }

    /// Register a handler for a system message status byte.
    pub fn register_system_handler(&mut self, status: u8, handler: SmallHandler) {
        debug_assert!(status & 0xF0 == 0xF0);
        let index = (status & 0x7F) as usize;
        assert!(
            self.status_handlers[index].is_none(),
            "status handler already registered"
        );
        self.status_handlers[index] = Some(handler);
    }

    /// Register a control-change handler on one timbre.
    pub fn register_cc_handler(&mut self, cc_number: u8, timbre: usize, handler: SmallHandler) {
        let slot = &mut self.timbres[timbre].cc[cc_number as usize];
        assert!(slot.is_none(), "cc handler already registered");
        *slot = Some(handler);
    }

    /// Register an RPN handler on one timbre.
    pub fn register_rpn_handler(
        &mut self,
        number: ParameterNumber,
        timbre: usize,
        handler: XrpnHandler,
    ) {
        assert!(
            (number.number() as usize) < MAX_RPNS,
            "capacity exceeded: MAX_RPNS"
        );
        let slot = &mut self.rpns[number.number() as usize].handlers[timbre];
        assert!(slot.is_none(), "rpn handler already registered");
        *slot = Some(handler);
    }

    /// Register an NRPN handler on one timbre. The dispatcher only tracks
    /// NRPNs somebody registered for.
    pub fn register_nrpn_handler(
        &mut self,
        number: ParameterNumber,
        timbre: usize,
        handler: XrpnHandler,
    ) {
        if !self.nrpns.contains_key(&number) {
            assert!(
                self.nrpns.len() < MAX_NRPNS,
                "capacity exceeded: MAX_NRPNS"
            );
        }
        let bundle = self.nrpns.entry(number).or_insert_with(XrpnBundle::new);
        let slot = &mut bundle.handlers[timbre];
        assert!(slot.is_none(), "nrpn handler already registered");
        *slot = Some(handler);
    }

    /// Register a system-exclusive handler.
    pub fn register_sysex_handler(&mut self, handler: SysexHandler) {
        self.sysex_handlers.push(handler);
    }

    /// Dispatch one small message to the registered handlers, running the
    /// RPN/NRPN machinery for control changes.
    pub fn dispatch(&mut self, layering: &Layering, msg: &SmallMessage) {
        if msg.status() == status::CONTROL_CHANGE {
            self.handle_cc(layering, msg);
        }
        let index = (msg.status_byte & 0x7F) as usize;
        if let Some(h) = &mut self.status_handlers[index] {
            h(msg);
        }
    }

    pub fn dispatch_sysex(&mut self, msg: &SysexMessage) {
        for h in &mut self.sysex_handlers {
            h(msg);
        }
    }

    fn handle_cc(&mut self, layering: &Layering, msg: &SmallMessage) {
        let channel = msg.channel();
        let value = msg.control_value();
        match msg.control_number() {
            cc::RPN_MSB => {
                let chan = &mut self.channels[channel as usize];
                chan.rpn_msb = Some(value);
                chan.state = XrpnState::RpnActive;
            }
            cc::RPN_LSB => {
                let chan = &mut self.channels[channel as usize];
                chan.rpn_lsb = Some(value);
                chan.state = XrpnState::RpnActive;
            }
            cc::NRPN_MSB => {
                let chan = &mut self.channels[channel as usize];
                chan.nrpn_msb = Some(value);
                chan.state = XrpnState::NrpnActive;
            }
            cc::NRPN_LSB => {
                let chan = &mut self.channels[channel as usize];
                chan.nrpn_lsb = Some(value);
                chan.state = XrpnState::NrpnActive;
            }
            cc::DATA_ENTRY_MSB => {
                self.with_active(layering, channel, |v, _, _| v.set_msb(value));
            }
            cc::DATA_ENTRY_LSB => {
                self.with_active(layering, channel, |v, _, _| v.set_lsb(value));
            }
            cc::DATA_INCREMENT => {
                // RP-018: the value byte is ignored.
                self.with_active(layering, channel, |v, state, number| {
                    if state == XrpnState::RpnActive {
                        match number {
                            n if n == rpn::PITCH_BEND_SENSITIVITY => v.increment_centesimally(),
                            n if n == rpn::COARSE_TUNING
                                || n == rpn::TUNING_PROGRAM_SELECT
                                || n == rpn::TUNING_BANK_SELECT =>
                            {
                                v.increment_msb()
                            }
                            _ => v.increment_value(),
                        }
                    } else {
                        // All NRPNs increment the LSB.
                        v.increment_value();
                    }
                });
            }
            cc::DATA_DECREMENT => {
                self.with_active(layering, channel, |v, state, number| {
                    if state == XrpnState::RpnActive {
                        match number {
                            n if n == rpn::PITCH_BEND_SENSITIVITY => v.decrement_centesimally(),
                            n if n == rpn::COARSE_TUNING
                                || n == rpn::TUNING_PROGRAM_SELECT
                                || n == rpn::TUNING_BANK_SELECT =>
                            {
                                v.decrement_msb()
                            }
                            _ => v.decrement_value(),
                        }
                    } else {
                        v.decrement_value();
                    }
                });
            }
            number => {
                let timbres = layering.channel_timbres(channel);
                for (ti, t) in self.timbres.iter_mut().enumerate() {
                    if timbres & (1 << ti) != 0 {
                        if let Some(h) = &mut t.cc[number as usize] {
                            h(msg);
                        }
                    }
                }
            }
        }
    }

    /// Apply `f` to the active parameter's value for this channel, then
    /// broadcast to the channel's timbres.
    fn with_active(
        &mut self,
        layering: &Layering,
        channel: u8,
        f: impl FnOnce(&mut ParameterValue, XrpnState, ParameterNumber),
    ) {
        let Some((state, number)) = self.channels[channel as usize].active_number() else {
            return;
        };
        let bundle = match state {
            XrpnState::RpnActive => {
                if number.number() as usize >= MAX_RPNS {
                    // Out-of-range RPN (including RPN null): data entry is
                    // ignored until a tracked parameter is selected.
                    return;
                }
                &mut self.rpns[number.number() as usize]
            }
            XrpnState::NrpnActive => match self.nrpns.get_mut(&number) {
                Some(b) => b,
                None => return,
            },
            XrpnState::Inactive => return,
        };
        f(&mut bundle.values[channel as usize], state, number);
        bundle.broadcast(layering.channel_timbres(channel), channel, number);
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn cc_msg(channel: u8, number: u8, value: u8) -> SmallMessage {
        SmallMessage::three(status::CONTROL_CHANGE | channel, number, value)
    }

    #[test]
    fn status_handlers_respect_channel_masks() {
        let mut d = Dispatcher::new();
        let l = Layering::new(1);
        let seen = Rc::new(RefCell::new(Vec::new()));
        let s = seen.clone();
        // Channels 0 and 2 only.
        d.register_status_handler(status::NOTE_ON, 0b0101, Box::new(move |m| {
            s.borrow_mut().push(m.channel());
        }));
        for ch in 0..4 {
            d.dispatch(&l, &SmallMessage::three(status::NOTE_ON | ch, 60, 100));
        }
        assert_eq!(*seen.borrow(), vec![0, 2]);
    }

    #[test]
    fn cc_handlers_follow_the_layering() {
        let mut d = Dispatcher::new();
        let mut l = Layering::new(2);
        l.multi_mode();
        let hits = Rc::new(RefCell::new(Vec::new()));
        for ti in 0..2 {
            let h = hits.clone();
            d.register_cc_handler(cc::MOD_WHEEL_MSB, ti, Box::new(move |m| {
                h.borrow_mut().push((ti, m.control_value()));
            }));
        }
        // Channel 1 maps to timbre 1 only in multi mode.
        d.dispatch(&l, &cc_msg(1, cc::MOD_WHEEL_MSB, 42));
        assert_eq!(*hits.borrow(), vec![(1, 42)]);
    }

    #[test]
    fn rpn_data_entry_broadcasts_to_channel_timbres() {
        let mut d = Dispatcher::new();
        let l = Layering::new(1);
        let got = Rc::new(RefCell::new(Vec::new()));
        let g = got.clone();
        d.register_rpn_handler(
            rpn::PITCH_BEND_SENSITIVITY,
            0,
            Box::new(move |ch, pn, v| {
                g.borrow_mut().push((ch, pn, v.value().unwrap()));
            }),
        );
        d.dispatch(&l, &cc_msg(0, cc::RPN_MSB, 0));
        d.dispatch(&l, &cc_msg(0, cc::RPN_LSB, 0));
        d.dispatch(&l, &cc_msg(0, cc::DATA_ENTRY_MSB, 2));
        assert_eq!(*got.borrow(), vec![(0, rpn::PITCH_BEND_SENSITIVITY, 256)]);
    }

    #[test]
    fn centesimal_increment_rolls_over_at_100_cents() {
        let mut d = Dispatcher::new();
        let l = Layering::new(1);
        let got = Rc::new(RefCell::new(Vec::new()));
        let g = got.clone();
        d.register_rpn_handler(
            rpn::PITCH_BEND_SENSITIVITY,
            0,
            Box::new(move |_, _, v| {
                g.borrow_mut().push(v.value().unwrap());
            }),
        );
        // Select pitch-bend sensitivity; set MSB=3 LSB=99; increment twice.
        d.dispatch(&l, &cc_msg(0, cc::RPN_MSB, 0));
        d.dispatch(&l, &cc_msg(0, cc::RPN_LSB, 0));
        d.dispatch(&l, &cc_msg(0, cc::DATA_ENTRY_MSB, 3));
        d.dispatch(&l, &cc_msg(0, cc::DATA_ENTRY_LSB, 99));
        d.dispatch(&l, &cc_msg(0, cc::DATA_INCREMENT, 0));
        d.dispatch(&l, &cc_msg(0, cc::DATA_INCREMENT, 0));
        assert_eq!(*got.borrow(), vec![384, 483, 512, 513]);
    }

    #[test]
    fn nrpn_increment_uses_the_lsb() {
        let mut d = Dispatcher::new();
        let l = Layering::new(1);
        let nrpn = ParameterNumber::new(1, 32);
        let got = Rc::new(RefCell::new(Vec::new()));
        let g = got.clone();
        d.register_nrpn_handler(nrpn, 0, Box::new(move |_, _, v| {
            g.borrow_mut().push(v.value().unwrap());
        }));
        d.dispatch(&l, &cc_msg(0, cc::NRPN_MSB, 1));
        d.dispatch(&l, &cc_msg(0, cc::NRPN_LSB, 32));
        d.dispatch(&l, &cc_msg(0, cc::DATA_ENTRY_MSB, 0));
        d.dispatch(&l, &cc_msg(0, cc::DATA_INCREMENT, 0));
        assert_eq!(*got.borrow(), vec![0, 1]);
    }

    #[test]
    fn rpn_null_deselects() {
        let mut d = Dispatcher::new();
        let l = Layering::new(1);
        let got = Rc::new(RefCell::new(0u32));
        let g = got.clone();
        d.register_rpn_handler(rpn::FINE_TUNING, 0, Box::new(move |_, _, _| {
            *g.borrow_mut() += 1;
        }));
        d.dispatch(&l, &cc_msg(0, cc::RPN_MSB, 127));
        d.dispatch(&l, &cc_msg(0, cc::RPN_LSB, 127));
        d.dispatch(&l, &cc_msg(0, cc::DATA_ENTRY_MSB, 5));
        assert_eq!(*got.borrow(), 0);
    }

    #[test]
    fn rpn_and_nrpn_latch_independently() {
        let mut d = Dispatcher::new();
        let l = Layering::new(1);
        let got = Rc::new(RefCell::new(Vec::new()));
        let g = got.clone();
        d.register_rpn_handler(rpn::PITCH_BEND_SENSITIVITY, 0, Box::new(move |_, pn, _| {
            g.borrow_mut().push(pn);
        }));
        // Select an RPN, then an NRPN, then re-activate the RPN by sending
        // another RPN select; the old RPN number is still latched.
        d.dispatch(&l, &cc_msg(0, cc::RPN_MSB, 0));
        d.dispatch(&l, &cc_msg(0, cc::RPN_LSB, 0));
        d.dispatch(&l, &cc_msg(0, cc::NRPN_MSB, 9));
        d.dispatch(&l, &cc_msg(0, cc::NRPN_LSB, 9));
        d.dispatch(&l, &cc_msg(0, cc::RPN_LSB, 0));
        d.dispatch(&l, &cc_msg(0, cc::DATA_ENTRY_MSB, 1));
        assert_eq!(*got.borrow(), vec![rpn::PITCH_BEND_SENSITIVITY]);
    }
}
