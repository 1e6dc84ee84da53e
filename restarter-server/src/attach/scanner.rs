//! Stdin scanning state machine for the attach console
//!
//! Pure byte-level logic, separated from terminal I/O so that chunk-boundary
//! behavior (a sigil split across reads, a hotkey landing mid-chunk) is
//! directly testable. The console task feeds raw stdin chunks in and acts on
//! the returned actions.

use regex::bytes::Regex;

use crate::ringbuf::RingBuffer;

/// Detach hotkey while attached: Ctrl+A
pub const DETACH_KEY: u8 = 0x01;

/// Capacity of the sigil detector window
pub const SIGIL_BUFFER_BYTES: usize = 16;

/// What the console should do with a chunk of stdin
#[derive(Debug, PartialEq, Eq)]
pub enum AttachAction {
    /// The sigil was seen; attach the terminal. `residue` holds any bytes
    /// that followed the sigil newline in the same window and belong to the
    /// child once attached.
    Attach { residue: Vec<u8> },
    /// Attached-mode input destined for the child's PTY
    Forward(Vec<u8>),
    /// The hotkey was seen (or stdin failed); release the terminal
    Detach,
}

/// Tracks whether the console is attached and watches for the mode-switching
/// byte sequences
pub struct InputScanner {
    attached: bool,
    sigil: RingBuffer,
    sigil_re: Regex,
}

impl InputScanner {
    pub fn new() -> Self {
        Self {
            attached: false,
            sigil: RingBuffer::new(SIGIL_BUFFER_BYTES),
            // CR/LF tolerant: "term" typed at a terminal arrives as term\r\n
            sigil_re: Regex::new(r"term\r?\n").expect("sigil pattern is valid"),
        }
    }

    pub fn is_attached(&self) -> bool {
        self.attached
    }

    /// Process one chunk of stdin, returning the actions it triggers
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<AttachAction> {
        let mut actions = Vec::new();

        if !self.attached {
            self.sigil.write(chunk);
            let window = self.sigil.snapshot();
            let Some(m) = self.sigil_re.find(&window) else {
                return actions;
            };
            let residue = window[m.end()..].to_vec();
            self.sigil.reset();
            self.attached = true;

            // The hotkey may already sit inside the residue; honor it so a
            // single chunk can attach and detach consistently.
            match residue.iter().position(|&b| b == DETACH_KEY) {
                Some(i) => {
                    actions.push(AttachAction::Attach {
                        residue: residue[..i].to_vec(),
                    });
                    self.attached = false;
                    actions.push(AttachAction::Detach);
                }
                None => actions.push(AttachAction::Attach { residue }),
            }
            return actions;
        }

        // Attached: everything passes through until the hotkey shows up.
        match chunk.iter().position(|&b| b == DETACH_KEY) {
            Some(i) => {
                if i > 0 {
                    actions.push(AttachAction::Forward(chunk[..i].to_vec()));
                }
                self.attached = false;
                // Bytes from the hotkey onward are discarded.
                actions.push(AttachAction::Detach);
            }
            None => {
                if !chunk.is_empty() {
                    actions.push(AttachAction::Forward(chunk.to_vec()));
                }
            }
        }
        actions
    }

    /// Drop back to detached mode without emitting anything
    ///
    /// Used when the child exits while attached: the waiter has already
    /// restored the terminal, and the scanner must not keep interpreting
    /// stdin as attached-mode input.
    pub fn force_detach(&mut self) {
        self.attached = false;
        self.sigil.reset();
    }
}

impl Default for InputScanner {
    fn default() -> Self {
        Self::new()
    }
}
