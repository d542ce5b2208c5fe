/*!
 * Tests for the timestamp and JSON repair layers working together
 */

use subloom::pipeline::response::{extract_json_array, parse_subtitle_response};
use subloom::subtitle::SubtitleItem;
use subloom::timestamp_utils::{TimestampNormalizer, normalize_timestamp};

#[test]
fn test_parseSubtitleResponse_withMessyReply_shouldRepairRecordsAndTiming() {
    let reply = r#"Here you go:
```json
{"subtitles": [
  {"id": 1, "start": "0:01.2", "end": "00:00:01,600", "original": "Hi", "translated": "Salut"},
  {"id": "2", "startTime": "00:00:75,000", "endTime": "00:01:30,000", "text": "Long", "translation": "Long"},
  {"id": 3, "start": "00:00:20,000", "end": "00:00:21,000", "original": "  ", "translated": ""}
]}
```"#;

    let mut items = parse_subtitle_response(reply, &TimestampNormalizer::new());
    items.iter_mut().for_each(SubtitleItem::sanitize);

    assert_eq!(items.len(), 2);
    assert_eq!(items[0].start_ms, 1_200);
    assert_eq!(items[0].end_ms, 3_100);
    assert_eq!(items[1].id, 2);
    assert_eq!(items[1].start_ms, 75_000);
    assert_eq!(items[1].end_ms, 80_000);
    assert_eq!(items[1].original, "Long");
}

#[test]
fn test_normalizeTimestamp_shouldBeIdempotentOnModelOutput() {
    for raw in ["00:01:75,000", "1:02:03.5", "12.5", "00:00:01:500", "garbage", "99:99:99,999"] {
        let once = normalize_timestamp(raw);
        assert_eq!(normalize_timestamp(&once), once, "input: {}", raw);
    }
}

#[test]
fn test_unitShift_shouldOnlyApplyWithMediaDuration() {
    assert_eq!(TimestampNormalizer::with_media_duration(120.0).normalize("01:30:15,000"), "00:01:30,150");
    assert_eq!(TimestampNormalizer::new().normalize("01:30:15,000"), "01:30:15,000");
}

#[test]
fn test_extractJsonArray_withTwoHalves_shouldMatchJoinedText() {
    let first = r#"[{"id": 1, "original": "a"}, {"id": 2, "orig"#;
    let second = r#"inal": "b"}]"#;

    assert!(extract_json_array(first).is_none());
    let joined = format!("{}{}", first, second);
    let values = extract_json_array(&joined).unwrap();
    assert_eq!(values.len(), 2);
    assert_eq!(values[1]["original"], "b");
}
