use assert_matches::assert_matches;
use pretty_assertions::assert_eq;
use rstest::rstest;

const SCENARIO_A: [u8; 9] = [0x00, 0x05, 0x1E, 0x0A, 0x0D, 0x14, 0x03, 0x06, 0x19];

#[test]
fn decodes_captured_payload() {
    let record = spraystat::StatisticsHandler::decode(&SCENARIO_A).expect("capture should decode");

    assert_eq!(5, record.count);
    assert_eq!(0, record.state);
    assert_eq!("2025-07-20 13:10:30", record.timestamp.to_string());
    assert_eq!(3, record.timestamp.weekday);
    assert!(record.timestamp.to_datetime().is_some());
}

#[test]
fn rejects_every_other_length() {
    let buffer = [0xFF_u8; 32];
    for length in (0..=buffer.len()).filter(|length| *length != 9) {
        assert_matches!(
            spraystat::StatisticsHandler::decode(&buffer[..length]),
            Err(spraystat::DecodeError::BadLength { expected: 9, actual }) if actual == length
        );
    }
}

#[rstest]
#[case(0x00, 1)]
#[case(0x0B, 12)]
fn month_is_reported_one_based(#[case] wire: u8, #[case] expected: u16) {
    let mut payload = SCENARIO_A;
    payload[7] = wire;
    let record = spraystat::StatisticsHandler::decode(&payload).expect("payload should decode");
    assert_eq!(expected, record.timestamp.month);
}

#[test]
fn packed_meta_decodes_back() {
    for (count, state) in [(0, 0), (16_383, 3), (5, 2), (8_192, 1)] {
        let [high, low] = spraystat::StatisticsHandler::pack_meta(count, state).to_be_bytes();
        let mut payload = SCENARIO_A;
        payload[0] = high;
        payload[1] = low;

        let record = spraystat::StatisticsHandler::decode(&payload).expect("payload should decode");
        assert_eq!((count, state), (record.count, record.state));
    }
}

#[test]
fn spray_command_is_single_byte_one() {
    assert_eq!([1], spraystat::CommandHandler::encode(spraystat::SPRAY_COMMAND));
}
