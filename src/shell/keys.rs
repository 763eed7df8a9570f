//! Canonical byte sequences for special key input.
//!
//! Controllers that need to drive interactive programs (answer a pager,
//! interrupt a hung command, leave a REPL) send one of these named keys
//! instead of guessing control bytes.

use serde::{Deserialize, Serialize};

pub const CTRL_C: &[u8] = &[0x03];
pub const CTRL_D: &[u8] = &[0x04];
pub const CTRL_Z: &[u8] = &[0x1a];
pub const ESC: &[u8] = &[0x1b];
pub const DOUBLE_ESC: &[u8] = &[0x1b, 0x1b];
pub const ENTER: &[u8] = &[0x0d];

/// A named special key accepted by `write_terminal`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpecialKey {
    #[serde(alias = "ctrl-c")]
    CtrlC,
    #[serde(alias = "ctrl-d")]
    CtrlD,
    #[serde(alias = "ctrl-z")]
    CtrlZ,
    #[serde(alias = "escape")]
    Esc,
    #[serde(alias = "double-escape")]
    DoubleEsc,
    #[serde(alias = "return")]
    Enter,
}

impl SpecialKey {
    pub fn bytes(self) -> &'static [u8] {
        match self {
            Self::CtrlC => CTRL_C,
            Self::CtrlD => CTRL_D,
            Self::CtrlZ => CTRL_Z,
            Self::Esc => ESC,
            Self::DoubleEsc => DOUBLE_ESC,
            Self::Enter => ENTER,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_bytes() {
        assert_eq!(SpecialKey::CtrlC.bytes(), &[0x03]);
        assert_eq!(SpecialKey::CtrlD.bytes(), &[0x04]);
        assert_eq!(SpecialKey::CtrlZ.bytes(), &[0x1a]);
        assert_eq!(SpecialKey::Esc.bytes(), &[0x1b]);
        assert_eq!(SpecialKey::DoubleEsc.bytes(), &[0x1b, 0x1b]);
        assert_eq!(SpecialKey::Enter.bytes(), &[0x0d]);
    }

    #[test]
    fn deserializes_snake_and_dashed_aliases() {
        let k: SpecialKey = serde_json::from_str("\"ctrl_c\"").unwrap();
        assert_eq!(k, SpecialKey::CtrlC);
        let k: SpecialKey = serde_json::from_str("\"ctrl-c\"").unwrap();
        assert_eq!(k, SpecialKey::CtrlC);
        let k: SpecialKey = serde_json::from_str("\"double_esc\"").unwrap();
        assert_eq!(k, SpecialKey::DoubleEsc);
    }
}
