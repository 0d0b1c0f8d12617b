// Character and string generators.
// Characters are drawn as an index into an alphabet, so they shrink towards
// the alphabet's first character; strings are lists of characters and shrink
// like lists.

use crate::generator::{lists_of, non_empty_lists_of, Generator};

const LOWERCASE: &str = "abcdefghijklmnopqrstuvwxyz";
const UPPERCASE: &str = "ABCDEFGHIJKLMNOPQRSTUVWXYZ";
const DIGITS: &str = "0123456789";

/// Uniform characters from `alphabet`, shrinking towards its first character.
pub fn chars_from(alphabet: &str) -> Generator<char> {
    let alphabet: Vec<char> = alphabet.chars().collect();
    Generator::from(move |data| {
        if alphabet.is_empty() {
            return Err(crate::error::GenerationError::custom("empty alphabet"));
        }
        let index = data.draw_int(0, alphabet.len() as i64 - 1)?;
        Ok(alphabet[index as usize])
    })
}

/// Any ASCII character, control characters included.
pub fn ascii_chars() -> Generator<char> {
    Generator::from(|data| Ok(char::from(data.draw_int(0, 127)? as u8)))
}

/// Printable ASCII, from space to tilde.
pub fn ascii_printable() -> Generator<char> {
    Generator::from(|data| Ok(char::from(data.draw_int(0x20, 0x7e)? as u8)))
}

pub fn ascii_letters() -> Generator<char> {
    chars_from(&format!("{}{}", LOWERCASE, UPPERCASE))
}

pub fn digits() -> Generator<char> {
    chars_from(DIGITS)
}

/// Identifiers: a letter or underscore, then letters, digits and underscores.
pub fn ascii_identifiers() -> Generator<String> {
    let head = chars_from(&format!("{}{}_", LOWERCASE, UPPERCASE));
    let tail = lists_of(&chars_from(&format!("{}{}{}_", LOWERCASE, UPPERCASE, DIGITS)));
    head.zip(&tail).map(|(first, rest)| {
        let mut identifier = String::with_capacity(rest.len() + 1);
        identifier.push(first);
        identifier.extend(rest);
        identifier
    })
}

pub fn strings_of(chars: &Generator<char>) -> Generator<String> {
    lists_of(chars).map(|chars| chars.into_iter().collect())
}

pub fn non_empty_strings_of(chars: &Generator<char>) -> Generator<String> {
    non_empty_lists_of(chars).map(|chars| chars.into_iter().collect())
}
