use serde::Serialize;
use std::fmt;

pub const CONTROL_PORT: u16 = 5900;

pub const VERSION_PREFIX: &[u8] = b"RFB";
pub const VERSION_BANNER_LEN: usize = 12;
pub const SECURITY_TYPES: [u8; 2] = [0x01, 0x01];
pub const SECURITY_NONE: [u8; 1] = [0x01];
pub const SECURITY_RESULT_OK: [u8; 4] = [0x00; 4];
pub const SERVER_INIT: [u8; 24] = [0x00; 24];

const KEY_EVENT: u8 = 0x04;
pub const KEY_FRAME_LEN: usize = 8;

pub const POWER_ON: &str = "POWER_ON";
pub const POWER_OFF: &str = "POWER_OFF";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct ButtonCode(pub u16);

impl ButtonCode {
    pub const POWER: Self = Self(0xe000);
    pub const CURSOR_ENTER: Self = Self(0xe001);
    const DIGIT_BASE: u16 = 0xe300;

    pub fn digit(value: u8) -> Option<Self> {
        (value <= 9).then(|| Self(Self::DIGIT_BASE + u16::from(value)))
    }

    pub fn digit_value(&self) -> Option<u8> {
        let offset = self.0.checked_sub(Self::DIGIT_BASE)?;
        (offset <= 9).then_some(offset as u8)
    }

    pub fn is_digit(&self) -> bool {
        self.digit_value().is_some()
    }

    pub fn from_hex(raw: &str) -> Option<Self> {
        if raw.len() != 4 || !raw.bytes().all(|b| b.is_ascii_hexdigit()) {
            return None;
        }
        u16::from_str_radix(raw, 16).ok().map(Self)
    }
}

impl fmt::Display for ButtonCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04x}", self.0)
    }
}

const BUTTONS: &[(&str, u16)] = &[
    ("MENU", 0xe00a),
    ("BACK", 0xe002),
    ("CURSOR_UP", 0xe100),
    ("CURSOR_DOWN", 0xe101),
    ("CURSOR_LEFT", 0xe102),
    ("CURSOR_RIGHT", 0xe103),
    ("CURSOR_ENTER", 0xe001),
    ("CHANNEL_UP", 0xe006),
    ("CHANNEL_DOWN", 0xe007),
    ("DIGIT_0", 0xe300),
    ("DIGIT_1", 0xe301),
    ("DIGIT_2", 0xe302),
    ("DIGIT_3", 0xe303),
    ("DIGIT_4", 0xe304),
    ("DIGIT_5", 0xe305),
    ("DIGIT_6", 0xe306),
    ("DIGIT_7", 0xe307),
    ("DIGIT_8", 0xe308),
    ("DIGIT_9", 0xe309),
    ("PLAY", 0xe400),
    ("PAUSE", 0xe400),
    ("STOP", 0xe402),
    ("SKIP_SECONDS_FORWARD", 0xe405),
    ("SKIP_SECONDS_BACKWARD", 0xe407),
    ("REVERSE", 0xe407),
    ("FORWARD", 0xe405),
    ("PREVIOUS", 0xe102),
    ("NEXT", 0xe103),
    ("MY_RECORDINGS", 0xef29),
    ("RECORD", 0xe403),
    ("LIVE", 0xef2a),
    ("FUNCTION_RED", 0xe200),
    ("FUNCTION_GREEN", 0xe201),
    ("FUNCTION_YELLOW", 0xe202),
    ("FUNCTION_BLUE", 0xe203),
    ("VOLUME_UP", 0xe003),
    ("VOLUME_DOWN", 0xe004),
    ("MUTE_TOGGLE", 0xe005),
    ("POWER", 0xe000),
    ("GUIDE", 0xe00b),
    ("ONDEMAND", 0xef28),
    ("HELP", 0xe009),
    ("INFO", 0xe00e),
    ("TEXT", 0xe00f),
];

pub fn normalize_button_name(name: &str) -> String {
    name.trim().to_uppercase().replace(' ', "_")
}

pub fn lookup_button(name: &str) -> Option<ButtonCode> {
    let name = normalize_button_name(name);
    BUTTONS
        .iter()
        .find(|(known, _)| *known == name)
        .map(|(_, code)| ButtonCode(*code))
}

pub fn button_name(code: ButtonCode) -> Option<&'static str> {
    BUTTONS
        .iter()
        .find(|(_, known)| *known == code.0)
        .map(|(name, _)| *name)
}

pub fn key_frame(code: ButtonCode, down: bool) -> [u8; KEY_FRAME_LEN] {
    let [hi, lo] = code.0.to_be_bytes();
    [KEY_EVENT, u8::from(down), 0x00, 0x00, 0x00, 0x00, hi, lo]
}

pub fn key_down(code: ButtonCode) -> [u8; KEY_FRAME_LEN] {
    key_frame(code, true)
}

pub fn key_up(code: ButtonCode) -> [u8; KEY_FRAME_LEN] {
    key_frame(code, false)
}

// Banners end at the first newline; one without it is cut at the standard length.
pub fn version_banner_len(buf: &[u8]) -> Option<usize> {
    if !buf.starts_with(VERSION_PREFIX) {
        return None;
    }
    match buf.iter().position(|&b| b == b'\n') {
        Some(end) => Some(end + 1),
        None if buf.len() >= VERSION_BANNER_LEN => Some(VERSION_BANNER_LEN),
        None => None,
    }
}
