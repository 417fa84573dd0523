//! CSEc, the S32K1 cryptographic services engine
//!
//! Commands are issued through the 32 word CSE_PRAM window: parameters and
//! data go to the pages after the header, then writing the header word (page
//! 0, word 0) starts the command. Completion is signalled by FSTAT.CCIF of the
//! flash controller, after which the error bits in page 0 tell how it went.
//!
//! All multi-byte fields in the window are big-endian.

use crate::config::DEFAULT_POLL_LIMIT;
use crate::secure::{SecurityModule, BLOCK_SIZE};
use core::cmp::min;
use vcell::VolatileCell;

/// Size of a CSE_PRAM page; one AES block
pub const PAGE_SIZE: usize = 16;
/// Data pages available per command invocation
const MAX_PAGES: usize = 7;
/// Words in the CSE_PRAM window
pub const PRAM_WORDS: usize = 32;

const CSE_PRAM_ADDRESS: usize = 0x1400_1000;
const FTFC_FSTAT_ADDRESS: usize = 0x4002_0000;
const FSTAT_CCIF: u8 = 1 << 7;

/// Command codes, as defined by SHE
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum Command {
    EncEcb = 0x01,
    EncCbc = 0x02,
    DecEcb = 0x03,
    DecCbc = 0x04,
    LoadPlainKey = 0x08,
    InitRng = 0x0A,
    Rng = 0x0C,
}

/// Data is copied into the window, not passed by pointer
const FORMAT_COPY: u8 = 0;

/// Whether a command continues the previous one
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum Sequence {
    First = 0,
    Subsequent = 1,
}

/// Key slots
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[allow(missing_docs)]
pub enum KeyId {
    SecretKey = 0x0,
    MasterEcu = 0x1,
    BootMacKey = 0x2,
    BootMac = 0x3,
    Key1 = 0x4,
    Key2 = 0x5,
    Key3 = 0x6,
    Key4 = 0x7,
    Key5 = 0x8,
    Key6 = 0x9,
    Key7 = 0xA,
    Key8 = 0xB,
    Key9 = 0xC,
    Key10 = 0xD,
    /// Volatile slot written by [`Csec::load_plain_key`]
    RamKey = 0xF,
    Key11 = 0x14,
    Key12 = 0x15,
    Key13 = 0x16,
    Key14 = 0x17,
    Key15 = 0x18,
    Key16 = 0x19,
    Key17 = 0x1A,
}

/// Failed CSEc command
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CsecError {
    /// Command issued out of sequence
    SequenceError,
    /// Key is locked by the boot or debug protection
    KeyNotAvailable,
    /// Key cannot be used for this command
    KeyInvalid,
    /// Key slot was never written
    KeyEmpty,
    /// Secure boot has not finished
    NoSecureBoot,
    /// Key slot is write protected
    KeyWriteProtected,
    /// Key update did not verify
    KeyUpdateError,
    /// Random number generator was not seeded
    RngSeed,
    /// Debugging is not authorized
    NoDebugging,
    /// Memory error in the engine
    MemoryFailure,
    /// Any other engine error
    GeneralError,
    /// Error bits that do not match a single known error
    Unknown(u16),
    /// FSTAT.CCIF never came back
    Timeout,
    /// Input is empty, not a whole number of blocks, or does not fit the
    /// output
    InvalidLength,
}

impl CsecError {
    /// `None` for the "no error" status
    fn from_status(status: u16) -> Option<Self> {
        match status {
            0x1 => None,
            0x2 => Some(Self::SequenceError),
            0x4 => Some(Self::KeyNotAvailable),
            0x8 => Some(Self::KeyInvalid),
            0x10 => Some(Self::KeyEmpty),
            0x20 => Some(Self::NoSecureBoot),
            0x40 => Some(Self::KeyWriteProtected),
            0x80 => Some(Self::KeyUpdateError),
            0x100 => Some(Self::RngSeed),
            0x200 => Some(Self::NoDebugging),
            0x400 => Some(Self::MemoryFailure),
            0x800 => Some(Self::GeneralError),
            other => Some(Self::Unknown(other)),
        }
    }
}

/// Access to the command window and the completion flag
pub trait CommandInterface {
    /// Read CSE_PRAM word `word`
    fn read_pram(&self, word: usize) -> u32;
    /// Write CSE_PRAM word `word`; writing word 0 starts a command
    fn write_pram(&self, word: usize, value: u32);
    /// FSTAT.CCIF
    fn command_complete(&self) -> bool;
}

/// Memory mapped CSE_PRAM and FTFC status register
pub struct CsecMmio {
    _private: (),
}

impl CsecMmio {
    /// # Safety
    /// The caller must own the flash controller and CSE_PRAM; nothing else may
    /// issue flash or CSEc commands while this exists.
    pub unsafe fn new() -> Self {
        Self { _private: () }
    }

    fn pram(&self, word: usize) -> &VolatileCell<u32> {
        debug_assert!(word < PRAM_WORDS);
        // Safety: the window is 32 words long and always mapped
        unsafe { &*((CSE_PRAM_ADDRESS + 4 * word) as *const VolatileCell<u32>) }
    }

    fn fstat(&self) -> &VolatileCell<u8> {
        // Safety: FTFC is always mapped
        unsafe { &*(FTFC_FSTAT_ADDRESS as *const VolatileCell<u8>) }
    }
}

impl CommandInterface for CsecMmio {
    fn read_pram(&self, word: usize) -> u32 {
        self.pram(word).get()
    }

    fn write_pram(&self, word: usize, value: u32) {
        self.pram(word).set(value)
    }

    fn command_complete(&self) -> bool {
        self.fstat().get() & FSTAT_CCIF != 0
    }
}

/// CSEc driver
pub struct Csec<P> {
    pram: P,
    poll_limit: u32,
}

impl<P: CommandInterface> Csec<P> {
    /// Create a driver
    pub fn new(pram: P) -> Self {
        Self {
            pram,
            poll_limit: DEFAULT_POLL_LIMIT,
        }
    }

    /// How many times FSTAT.CCIF is polled before giving up with
    /// [`CsecError::Timeout`]
    pub fn set_poll_limit(&mut self, poll_limit: u32) {
        self.poll_limit = poll_limit;
    }

    /// Give back the command interface
    pub fn free(self) -> P {
        self.pram
    }

    /// Seed the random number generator.
    ///
    /// Must be called before [`Self::generate_rnd`].
    pub fn init_rng(&mut self) -> Result<(), CsecError> {
        self.execute(Command::InitRng, Sequence::First, KeyId::SecretKey)
    }

    /// Generate 128 random bits.
    pub fn generate_rnd(&mut self, buf: &mut [u8; PAGE_SIZE]) -> Result<(), CsecError> {
        self.execute(Command::Rng, Sequence::First, KeyId::SecretKey)?;
        self.read_pages(1, buf);
        Ok(())
    }

    /// Write a plaintext key to [`KeyId::RamKey`].
    pub fn load_plain_key(&mut self, key: &[u8; PAGE_SIZE]) -> Result<(), CsecError> {
        self.write_pages(1, key);
        self.execute(Command::LoadPlainKey, Sequence::First, KeyId::RamKey)
    }

    /// AES-128 ECB encryption of whole blocks.
    pub fn encrypt_ecb(
        &mut self,
        key: KeyId,
        plaintext: &[u8],
        ciphertext: &mut [u8],
    ) -> Result<(), CsecError> {
        self.process(Command::EncEcb, key, None, plaintext, ciphertext)
    }

    /// AES-128 ECB decryption of whole blocks.
    pub fn decrypt_ecb(
        &mut self,
        key: KeyId,
        ciphertext: &[u8],
        plaintext: &mut [u8],
    ) -> Result<(), CsecError> {
        self.process(Command::DecEcb, key, None, ciphertext, plaintext)
    }

    /// AES-128 CBC encryption of whole blocks.
    pub fn encrypt_cbc(
        &mut self,
        key: KeyId,
        iv: &[u8; PAGE_SIZE],
        plaintext: &[u8],
        ciphertext: &mut [u8],
    ) -> Result<(), CsecError> {
        self.process(Command::EncCbc, key, Some(iv), plaintext, ciphertext)
    }

    /// AES-128 CBC decryption of whole blocks.
    pub fn decrypt_cbc(
        &mut self,
        key: KeyId,
        iv: &[u8; PAGE_SIZE],
        ciphertext: &[u8],
        plaintext: &mut [u8],
    ) -> Result<(), CsecError> {
        self.process(Command::DecCbc, key, Some(iv), ciphertext, plaintext)
    }

    /// Feed `input` through the engine, at most seven pages per command. On
    /// the first command of CBC operations page 1 holds the IV.
    fn process(
        &mut self,
        command: Command,
        key: KeyId,
        iv: Option<&[u8; PAGE_SIZE]>,
        input: &[u8],
        output: &mut [u8],
    ) -> Result<(), CsecError> {
        if input.is_empty() || input.len() % PAGE_SIZE != 0 || output.len() < input.len() {
            return Err(CsecError::InvalidLength);
        }
        let pages = u16::try_from(input.len() / PAGE_SIZE).map_err(|_| CsecError::InvalidLength)?;
        self.set_page_length(pages);

        let mut first_page = 1;
        if let Some(iv) = iv {
            self.write_pages(1, iv);
            first_page = 2;
        }

        let mut sequence = Sequence::First;
        let mut done = 0;
        while done < input.len() {
            let room = (MAX_PAGES + 1 - first_page) * PAGE_SIZE;
            let chunk = min(room, input.len() - done);
            self.write_pages(first_page, &input[done..done + chunk]);
            self.execute(command, sequence, key)?;
            self.read_pages(first_page, &mut output[done..done + chunk]);

            done += chunk;
            sequence = Sequence::Subsequent;
            first_page = 1;
        }
        Ok(())
    }

    /// Write the header and wait for the result.
    fn execute(
        &mut self,
        command: Command,
        sequence: Sequence,
        key: KeyId,
    ) -> Result<(), CsecError> {
        let header =
            u32::from_be_bytes([command as u8, FORMAT_COPY, sequence as u8, key as u8]);
        self.pram.write_pram(0, header);

        let mut polls = 0;
        while !self.pram.command_complete() {
            polls += 1;
            if polls >= self.poll_limit {
                #[cfg(feature = "defmt")]
                defmt::warn!("CSEc command {} did not complete", command as u8);
                return Err(CsecError::Timeout);
            }
        }

        let status = (self.pram.read_pram(1) >> 16) as u16;
        match CsecError::from_status(status) {
            None => Ok(()),
            Some(error) => Err(error),
        }
    }

    /// Page length lives in the lower half of word 3
    fn set_page_length(&self, pages: u16) {
        let word = self.pram.read_pram(3);
        self.pram
            .write_pram(3, (word & 0xFFFF_0000) | u32::from(pages));
    }

    fn write_pages(&self, page: usize, bytes: &[u8]) {
        for (n, chunk) in bytes.chunks_exact(4).enumerate() {
            let word = u32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
            self.pram.write_pram(4 * page + n, word);
        }
    }

    fn read_pages(&self, page: usize, bytes: &mut [u8]) {
        for (n, chunk) in bytes.chunks_exact_mut(4).enumerate() {
            chunk.copy_from_slice(&self.pram.read_pram(4 * page + n).to_be_bytes());
        }
    }
}

impl<P: CommandInterface> SecurityModule for Csec<P> {
    type Key = KeyId;
    type Error = CsecError;

    fn encrypt_block(
        &mut self,
        key: KeyId,
        block: &mut [u8; BLOCK_SIZE],
    ) -> Result<(), CsecError> {
        let plaintext = *block;
        self.encrypt_ecb(key, &plaintext, block)
    }

    fn decrypt_block(
        &mut self,
        key: KeyId,
        block: &mut [u8; BLOCK_SIZE],
    ) -> Result<(), CsecError> {
        let ciphertext = *block;
        self.decrypt_ecb(key, &ciphertext, block)
    }
}
