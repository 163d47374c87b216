/// Command byte that triggers the device's spray/test action.
pub const SPRAY_COMMAND: u8 = 1;

/// Codec for the remote command characteristic.
pub struct CommandHandler;

impl CommandHandler {
    /// Encodes a command value as the single-byte characteristic payload.
    ///
    /// ```
    /// use spraystat::{CommandHandler, SPRAY_COMMAND};
    ///
    /// assert_eq!([0x01], CommandHandler::encode(SPRAY_COMMAND));
    /// ```
    #[must_use]
    pub fn encode(value: u8) -> [u8; 1] {
        [value]
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(SPRAY_COMMAND, [0x01])]
    #[case(0, [0x00])]
    #[case(u8::MAX, [0xFF])]
    fn encode_produces_one_byte(#[case] value: u8, #[case] expected: [u8; 1]) {
        assert_eq!(expected, CommandHandler::encode(value));
    }
}
