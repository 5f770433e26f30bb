/// Digit keys reach the first nine sounds, Shift+digit the next nine.
pub const SHORTCUT_SLOTS: usize = 18;

/// US-layout symbols produced by Shift+1 ... Shift+9.
const SHIFTED_DIGITS: [char; 9] = ['!', '@', '#', '$', '%', '^', '&', '*', '('];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    Char(char),
    Space,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyInput {
    pub key: Key,
    pub shift: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAction {
    /// Play the sound at this list position.
    Play(usize),
    StopAll,
    Ignore,
}

impl KeyInput {
    pub fn plain(c: char) -> Self {
        Self::from_char(c)
    }

    pub fn shifted(c: char) -> Self {
        Self {
            key: Key::Char(c),
            shift: true,
        }
    }

    pub fn space() -> Self {
        Self {
            key: Key::Space,
            shift: false,
        }
    }

    /// Interpret a raw character, folding shifted digit symbols back onto
    /// their digit.
    pub fn from_char(c: char) -> Self {
        if c == ' ' {
            return Self::space();
        }
        match SHIFTED_DIGITS.iter().position(|&s| s == c) {
            Some(i) => Self::shifted(digit_char(i + 1)),
            None => Self {
                key: Key::Char(c),
                shift: false,
            },
        }
    }

    /// Parse a textual key token: a single character, `space`, `shift+N` or `S-N`.
    pub fn parse(token: &str) -> Option<Self> {
        if token == " " {
            return Some(Self::space());
        }
        let token = token.trim();
        if token.eq_ignore_ascii_case("space") {
            return Some(Self::space());
        }

        let lower = token.to_ascii_lowercase();
        let shifted = lower
            .strip_prefix("shift+")
            .or_else(|| lower.strip_prefix("s-"));
        if let Some(rest) = shifted {
            return single_char(rest).map(Self::shifted);
        }

        single_char(token).map(Self::from_char)
    }

    pub fn action(&self) -> KeyAction {
        match self.key {
            Key::Space => KeyAction::StopAll,
            Key::Char(c) => match c.to_digit(10) {
                Some(d @ 1..=9) => {
                    let d = d as usize;
                    if self.shift {
                        KeyAction::Play(d + 8)
                    } else {
                        KeyAction::Play(d - 1)
                    }
                }
                _ => KeyAction::Ignore,
            },
        }
    }
}

fn single_char(s: &str) -> Option<char> {
    let mut chars = s.chars();
    let c = chars.next()?;
    chars.next().is_none().then_some(c)
}

fn digit_char(d: usize) -> char {
    char::from_digit(d as u32, 10).unwrap_or('0')
}

/// How the shortcut for list position `index` is written, if it has one.
pub fn shortcut_label(index: usize) -> Option<String> {
    match index {
        0..=8 => Some(format!("{}", index + 1)),
        9..=17 => Some(format!("S-{}", index - 8)),
        _ => None,
    }
}

/// Key reference shown by the interactive board.
pub fn help_text() -> &'static str {
    "Play sounds\n\
     \x20 1 - 9          play sounds 1-9\n\
     \x20 Shift + 1 - 9  play sounds 10-18 (type shift+N, S-N or !@#...)\n\
     Control\n\
     \x20 space          stop the playing sound\n\
     \x20 r              reload the list\n\
     \x20 ?              show this help\n\
     \x20 q              quit"
}
