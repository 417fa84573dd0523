//! In-memory models of FlexCAN controllers on a shared wire and of the CSEc
//! command window, used by the unit tests.

use crate::bus::{Can, CanConfigurable, ConfigurationError};
use crate::config::DataSize;
use crate::csec::{Command, CommandInterface, KeyId, PRAM_WORDS};
use crate::reg::{
    Ctrl1, Ctrl2, FdCtrl, Iflag1, MbCs, Mcr, Register, Registers, RxMgMask, Timer, RAM_OFFSET,
    RAM_WORDS,
};
use aes::cipher::{BlockDecrypt, BlockEncrypt, KeyInit};
use aes::Aes128;
use core::cell::{Cell, RefCell};
use core::convert::Infallible;
use embedded_hal::digital::v2::ToggleableOutputPin;
use flexcan_core::{CanId, ClockSource, Dependencies};
use fugit::{HertzU32, RateExtU32};
use std::collections::VecDeque;
use std::rc::Rc;
use std::vec::Vec;

const WORDS: usize = 0xC08 / 4;

const MCR_RESET: u32 = 0xD890_000F;
const CTRL2_RESET: u32 = 0x00B0_0000;
const FDCTRL_RESET: u32 = 0x8000_0100;

const MCR_NOTRDY: u32 = 1 << 27;
const MCR_FRZACK: u32 = 1 << 24;
const MCR_LPMACK: u32 = 1 << 20;
const MCR_STATUS: u32 = MCR_NOTRDY | MCR_FRZACK | MCR_LPMACK;

const CODE_RX_EMPTY: u8 = 0x4;
const CODE_RX_FULL: u8 = 0x2;
const CODE_RX_OVERRUN: u8 = 0x6;
const CODE_TX_INACTIVE: u8 = 0x8;
const CODE_TX_DATA: u8 = 0xC;

/// Peripheral marker for simulated controllers
pub(crate) enum SimCan {}

unsafe impl CanId for SimCan {
    const ADDRESS: *const () = core::ptr::null();
}

pub(crate) struct SimDependencies {
    pub(crate) clock_source: ClockSource,
    pub(crate) can_clock: HertzU32,
}

impl SimDependencies {
    /// SOSCDIV2 at 8 MHz
    pub(crate) fn oscillator() -> Self {
        Self {
            clock_source: ClockSource::Oscillator,
            can_clock: 8.MHz(),
        }
    }

    /// SYS_CLK at 80 MHz
    pub(crate) fn peripheral() -> Self {
        Self {
            clock_source: ClockSource::Peripheral,
            can_clock: 80.MHz(),
        }
    }
}

unsafe impl Dependencies<SimCan> for SimDependencies {
    fn clock_source(&self) -> ClockSource {
        self.clock_source
    }

    fn can_clock(&self) -> HertzU32 {
        self.can_clock
    }
}

pub(crate) type SimBus = Can<SimCan, SimDependencies, SimFlexcan>;
pub(crate) type SimConfigurable = CanConfigurable<SimCan, SimDependencies, SimFlexcan>;

/// Attach a controller to `wire` and bring it into freeze mode.
pub(crate) fn configurable(
    wire: &Rc<Wire>,
    dependencies: SimDependencies,
) -> Result<SimConfigurable, ConfigurationError> {
    CanConfigurable::with_registers(wire.attach(), 500.kHz(), dependencies)
}

#[derive(Copy, Clone)]
struct Frame {
    sender: usize,
    mailbox: usize,
    cs: MbCs,
    id: u32,
    data: [u32; 16],
}

struct Controller {
    words: RefCell<Vec<u32>>,
    stalled: Cell<bool>,
    timer_reads: Cell<usize>,
}

impl Controller {
    fn new() -> Self {
        let mut words = vec![0; WORDS];
        words[Mcr::OFFSET / 4] = MCR_RESET;
        words[Ctrl2::OFFSET / 4] = CTRL2_RESET;
        words[FdCtrl::OFFSET / 4] = FDCTRL_RESET;
        Self {
            words: RefCell::new(words),
            stalled: Cell::new(false),
            timer_reads: Cell::new(0),
        }
    }

    fn word(&self, offset: usize) -> u32 {
        self.words.borrow()[offset / 4]
    }

    fn mcr(&self) -> Mcr {
        Mcr::from(self.word(Mcr::OFFSET))
    }

    fn running(&self) -> bool {
        let mcr = self.mcr();
        !mcr.mdis() && !(mcr.frz() && mcr.halt())
    }

    fn layout(&self) -> DataSize {
        if !self.mcr().fden() {
            return DataSize::Bytes8;
        }
        match FdCtrl::from(self.word(FdCtrl::OFFSET)).mbdsr0() {
            0 => DataSize::Bytes8,
            1 => DataSize::Bytes16,
            2 => DataSize::Bytes32,
            _ => DataSize::Bytes64,
        }
    }

    /// Number of mailboxes taking part in matching
    fn mailboxes(&self) -> usize {
        let last = usize::from(self.mcr().maxmb());
        self.layout().mailbox_count().min(last + 1)
    }

    fn ram_base(&self, mailbox: usize) -> usize {
        RAM_OFFSET / 4 + mailbox * self.layout().words_per_mailbox()
    }

    fn data_words(&self) -> usize {
        self.layout().words_per_mailbox() - 2
    }

    /// A transmit request when the control word of a mailbox is written with
    /// the DATA code
    fn transmit_request(&self, node: usize, ram_word: usize) -> Option<Frame> {
        let per_mailbox = self.layout().words_per_mailbox();
        let mailbox = ram_word / per_mailbox;
        if ram_word % per_mailbox != 0 || mailbox >= self.layout().mailbox_count() {
            return None;
        }
        let words = self.words.borrow();
        let base = RAM_OFFSET / 4 + ram_word;
        let cs = MbCs::from(words[base]);
        if cs.code() != CODE_TX_DATA {
            return None;
        }
        let mut data = [0; 16];
        let count = per_mailbox - 2;
        data[..count].copy_from_slice(&words[base + 2..base + 2 + count]);
        Some(Frame {
            sender: node,
            mailbox,
            cs,
            id: words[base + 1],
            data,
        })
    }

    fn accepts(&self, frame: &Frame, mailbox: usize, codes: &[u8]) -> bool {
        let words = self.words.borrow();
        let base = self.ram_base(mailbox);
        let cs = MbCs::from(words[base]);
        let mask = RxMgMask::from(words[RxMgMask::OFFSET / 4]).mg() & 0x1FFF_FFFF;
        codes.contains(&cs.code())
            && cs.ide() == frame.cs.ide()
            && (words[base + 1] ^ frame.id) & mask == 0
    }

    /// Store `frame` in the first matching receive mailbox, preferring empty
    /// ones over full ones.
    fn store(&self, frame: &Frame) {
        if !self.running() || (frame.cs.edl() && !self.mcr().fden()) {
            return;
        }
        let count = self.mailboxes();
        let target = (0..count)
            .find(|&mb| self.accepts(frame, mb, &[CODE_RX_EMPTY]))
            .or_else(|| {
                (0..count).find(|&mb| self.accepts(frame, mb, &[CODE_RX_FULL, CODE_RX_OVERRUN]))
            });

        let timer = self.word(Timer::OFFSET) & 0xFFFF;
        if let Some(mb) = target {
            let base = self.ram_base(mb);
            let data_words = self.data_words();
            let mut words = self.words.borrow_mut();
            let iflag = Iflag1(words[Iflag1::OFFSET / 4]);
            let mut cs = frame.cs;
            cs.set_code(if iflag.is_set(mb) {
                CODE_RX_OVERRUN
            } else {
                CODE_RX_FULL
            });
            words[base] = (u32::from(cs) & 0xFFFF_0000) | timer;
            words[base + 1] = frame.id;
            words[base + 2..base + 2 + data_words].copy_from_slice(&frame.data[..data_words]);
            words[Iflag1::OFFSET / 4] |= Iflag1::mailbox(mb).0;
        }
        self.tick();
    }

    /// Transmission done: the mailbox becomes inactive and flags completion.
    /// A remote request leaves the mailbox waiting for the answer instead.
    fn complete(&self, mailbox: usize) {
        let base = self.ram_base(mailbox);
        let timer = self.word(Timer::OFFSET) & 0xFFFF;
        let mut words = self.words.borrow_mut();
        let mut cs = MbCs::from(words[base]);
        cs.set_code(if cs.rtr() {
            CODE_RX_EMPTY
        } else {
            CODE_TX_INACTIVE
        });
        words[base] = (u32::from(cs) & 0xFFFF_0000) | timer;
        words[Iflag1::OFFSET / 4] |= Iflag1::mailbox(mailbox).0;
    }

    fn tick(&self) {
        let mut words = self.words.borrow_mut();
        let timer = &mut words[Timer::OFFSET / 4];
        *timer = (*timer + 1) & 0xFFFF;
    }
}

/// Mode acknowledge bits as the hardware would report them for the requested
/// control bits
fn mcr_status(request: Mcr) -> u32 {
    if request.mdis() {
        MCR_LPMACK | MCR_NOTRDY
    } else if request.frz() && request.halt() {
        MCR_FRZACK | MCR_NOTRDY
    } else {
        0
    }
}

/// Controllers attached to one bus
#[derive(Default)]
pub(crate) struct Wire {
    nodes: RefCell<Vec<Rc<Controller>>>,
    pending: RefCell<VecDeque<Frame>>,
}

impl Wire {
    pub(crate) fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    /// Connect a controller in its reset state
    pub(crate) fn attach(self: &Rc<Self>) -> SimFlexcan {
        let controller = Rc::new(Controller::new());
        let mut nodes = self.nodes.borrow_mut();
        nodes.push(controller.clone());
        SimFlexcan {
            wire: self.clone(),
            node: nodes.len() - 1,
            controller,
        }
    }

    /// Frames requested but not yet on the wire
    pub(crate) fn pending(&self) -> usize {
        self.pending.borrow().len()
    }

    /// Put every pending frame on the wire, in request order. Returns the
    /// number of frames sent.
    pub(crate) fn deliver(&self) -> usize {
        let mut sent = 0;
        while self.deliver_next() {
            sent += 1;
        }
        sent
    }

    /// Put the oldest pending frame on the wire. Returns `false` if there was
    /// none.
    pub(crate) fn deliver_next(&self) -> bool {
        let frame = match self.pending.borrow_mut().pop_front() {
            Some(frame) => frame,
            None => return false,
        };
        let nodes = self.nodes.borrow();
        let sender = &nodes[frame.sender];
        // A frozen or disabled sender never gets to arbitrate
        if !sender.running() {
            return true;
        }
        let loopback = Ctrl1::from(sender.word(Ctrl1::OFFSET)).lpb();
        for (index, node) in nodes.iter().enumerate() {
            let own = index == frame.sender;
            let listens = if loopback {
                own
            } else {
                !own || !node.mcr().srxdis()
            };
            if listens {
                node.store(&frame);
            }
        }
        sender.complete(frame.mailbox);
        true
    }
}

/// Register access of one simulated controller
#[derive(Clone)]
pub(crate) struct SimFlexcan {
    wire: Rc<Wire>,
    node: usize,
    controller: Rc<Controller>,
}

impl SimFlexcan {
    /// Register value without side effects
    pub(crate) fn peek(&self, offset: usize) -> u32 {
        self.controller.word(offset)
    }

    /// Message buffer RAM word
    pub(crate) fn ram(&self, word: usize) -> u32 {
        self.peek(RAM_OFFSET + 4 * word)
    }

    /// How often TIMER was read
    pub(crate) fn timer_reads(&self) -> usize {
        self.controller.timer_reads.get()
    }

    /// Stop acknowledging mode changes
    pub(crate) fn stall(&self) {
        self.controller.stalled.set(true);
    }
}

impl Registers for SimFlexcan {
    fn read_word(&self, offset: usize) -> u32 {
        if offset == Timer::OFFSET {
            let reads = &self.controller.timer_reads;
            reads.set(reads.get() + 1);
        }
        self.controller.word(offset)
    }

    fn write_word(&self, offset: usize, value: u32) {
        let controller = &self.controller;
        let ram = RAM_OFFSET..RAM_OFFSET + 4 * RAM_WORDS;
        {
            let mut words = controller.words.borrow_mut();
            let slot = &mut words[offset / 4];
            match offset {
                o if o == Mcr::OFFSET => {
                    let status = if controller.stalled.get() {
                        *slot & MCR_STATUS
                    } else {
                        mcr_status(Mcr::from(value))
                    };
                    *slot = (value & !MCR_STATUS) | status;
                }
                o if o == Iflag1::OFFSET => *slot &= !value,
                _ => *slot = value,
            }
        }
        if ram.contains(&offset) {
            let request = controller.transmit_request(self.node, (offset - RAM_OFFSET) / 4);
            if let Some(frame) = request {
                self.wire.pending.borrow_mut().push_back(frame);
            }
        }
    }
}

/// Indicator that counts its toggles
#[derive(Default)]
pub(crate) struct CountingPin {
    pub(crate) toggles: u32,
}

impl ToggleableOutputPin for CountingPin {
    type Error = Infallible;

    fn toggle(&mut self) -> Result<(), Infallible> {
        self.toggles += 1;
        Ok(())
    }
}

const NO_ERROR: u16 = 0x1;
const SEQUENCE_ERROR: u16 = 0x2;
const KEY_EMPTY: u16 = 0x10;
const RNG_SEED: u16 = 0x100;
const GENERAL_ERROR: u16 = 0x800;

/// CSEc model running commands as soon as the header word is written
pub(crate) struct SimCsec {
    pram: RefCell<[u32; PRAM_WORDS]>,
    keys: RefCell<[Option<[u8; 16]>; 32]>,
    seeded: Cell<bool>,
    random: Cell<u8>,
    hung: Cell<bool>,
    remaining: Cell<usize>,
    chain: Cell<[u8; 16]>,
    commands: Cell<usize>,
}

impl SimCsec {
    pub(crate) fn new() -> Self {
        Self {
            pram: RefCell::new([0; PRAM_WORDS]),
            keys: RefCell::new([None; 32]),
            seeded: Cell::new(false),
            random: Cell::new(0),
            hung: Cell::new(false),
            remaining: Cell::new(0),
            chain: Cell::new([0; 16]),
            commands: Cell::new(0),
        }
    }

    /// Provision a key slot
    pub(crate) fn with_key(self, slot: KeyId, key: [u8; 16]) -> Self {
        self.keys.borrow_mut()[slot as usize] = Some(key);
        self
    }

    /// Never complete a command again
    pub(crate) fn hang(&self) {
        self.hung.set(true);
    }

    /// Number of commands started
    pub(crate) fn commands(&self) -> usize {
        self.commands.get()
    }

    fn page(&self, page: usize) -> [u8; 16] {
        let pram = self.pram.borrow();
        let mut bytes = [0; 16];
        for (n, chunk) in bytes.chunks_exact_mut(4).enumerate() {
            chunk.copy_from_slice(&pram[4 * page + n].to_be_bytes());
        }
        bytes
    }

    fn set_page(&self, page: usize, bytes: &[u8; 16]) {
        let mut pram = self.pram.borrow_mut();
        for (n, chunk) in bytes.chunks_exact(4).enumerate() {
            pram[4 * page + n] = u32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        }
    }

    fn execute(&self, header: u32) {
        self.commands.set(self.commands.get() + 1);
        let [command, _format, sequence, key] = header.to_be_bytes();
        let status = self.run(command, sequence, key);
        let mut pram = self.pram.borrow_mut();
        pram[1] = (pram[1] & 0xFFFF) | (u32::from(status) << 16);
    }

    fn run(&self, command: u8, sequence: u8, key: u8) -> u16 {
        let is = |c: Command| command == c as u8;
        if is(Command::LoadPlainKey) {
            self.keys.borrow_mut()[KeyId::RamKey as usize] = Some(self.page(1));
            NO_ERROR
        } else if is(Command::InitRng) {
            self.seeded.set(true);
            NO_ERROR
        } else if is(Command::Rng) {
            if !self.seeded.get() {
                return RNG_SEED;
            }
            let mut bytes = [0; 16];
            for byte in bytes.iter_mut() {
                let next = self.random.get().wrapping_mul(29).wrapping_add(71);
                self.random.set(next);
                *byte = next;
            }
            self.set_page(1, &bytes);
            NO_ERROR
        } else if is(Command::EncEcb) || is(Command::DecEcb) {
            self.cipher(is(Command::EncEcb), false, sequence, key)
        } else if is(Command::EncCbc) || is(Command::DecCbc) {
            self.cipher(is(Command::EncCbc), true, sequence, key)
        } else {
            GENERAL_ERROR
        }
    }

    fn cipher(&self, encrypt: bool, cbc: bool, sequence: u8, key: u8) -> u16 {
        let key = match self.keys.borrow().get(usize::from(key)).copied().flatten() {
            Some(key) => key,
            None => return KEY_EMPTY,
        };
        let aes = Aes128::new(aes::cipher::generic_array::GenericArray::from_slice(&key));

        let mut first_page = 1;
        if sequence == 0 {
            let page_length = self.pram.borrow()[3] & 0xFFFF;
            self.remaining.set(page_length as usize);
            if cbc {
                self.chain.set(self.page(1));
                first_page = 2;
            }
        } else if self.remaining.get() == 0 {
            return SEQUENCE_ERROR;
        }

        let count = self.remaining.get().min(8 - first_page);
        for page in first_page..first_page + count {
            let input = self.page(page);
            let mut block = aes::Block::clone_from_slice(&input);
            let mut output = [0; 16];
            if encrypt {
                if cbc {
                    xor(&mut block, &self.chain.get());
                }
                aes.encrypt_block(&mut block);
                output.copy_from_slice(&block);
                if cbc {
                    self.chain.set(output);
                }
            } else {
                aes.decrypt_block(&mut block);
                output.copy_from_slice(&block);
                if cbc {
                    xor(&mut output, &self.chain.get());
                    self.chain.set(input);
                }
            }
            self.set_page(page, &output);
        }
        self.remaining.set(self.remaining.get() - count);
        NO_ERROR
    }
}

fn xor(block: &mut [u8], other: &[u8; 16]) {
    for (byte, other) in block.iter_mut().zip(other) {
        *byte ^= other;
    }
}

impl CommandInterface for SimCsec {
    fn read_pram(&self, word: usize) -> u32 {
        self.pram.borrow()[word]
    }

    fn write_pram(&self, word: usize, value: u32) {
        self.pram.borrow_mut()[word] = value;
        if word == 0 && !self.hung.get() {
            self.execute(value);
        }
    }

    fn command_complete(&self) -> bool {
        !self.hung.get()
    }
}

impl CommandInterface for &SimCsec {
    fn read_pram(&self, word: usize) -> u32 {
        (*self).read_pram(word)
    }

    fn write_pram(&self, word: usize, value: u32) {
        (*self).write_pram(word, value)
    }

    fn command_complete(&self) -> bool {
        (*self).command_complete()
    }
}
