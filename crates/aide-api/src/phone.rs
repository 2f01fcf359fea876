use phonenumber::{Mode, country};

/// Region assumed for numbers written without an international prefix.
const DEFAULT_REGION: country::Id = country::Id::MY;

/// Parse user input into canonical E.164 digits without the `+`.
///
/// Numbers are checked against the numbering plan of their country, so input
/// of plausible length that no carrier could assign is rejected. Letters are
/// refused outright rather than read as a vanity keypad.
pub fn normalize_phone(input: &str) -> Option<String> {
    let trimmed = input.trim();
    if trimmed.is_empty()
        || !trimmed
            .chars()
            .all(|c| c.is_ascii_digit() || matches!(c, '+' | ' ' | '-' | '.' | '(' | ')'))
    {
        return None;
    }

    let number = phonenumber::parse(Some(DEFAULT_REGION), trimmed).ok()?;
    if !phonenumber::is_valid(&number) {
        return None;
    }

    let e164 = number.format().mode(Mode::E164).to_string();
    e164.strip_prefix('+').map(str::to_string)
}

pub fn is_valid_pin(pin: &str) -> bool {
    pin.len() == 6 && pin.bytes().all(|b| b.is_ascii_digit())
}
