//! Codec tests across the value model, writer and reader
//!
//! These tests verify round trips, shared-reference preservation, cycle
//! safety and the exact bytes produced for a few reference inputs.

#[cfg(test)]
mod tests {
    use super::super::*;
    use crate::io::{Reader, Writer};
    use chrono::NaiveDate;
    use uuid::Uuid;

    fn encode(value: &Value) -> Vec<u8> {
        let mut writer = Writer::new(false);
        writer.serialize(value);
        writer.into_bytes()
    }

    fn decode(bytes: Vec<u8>) -> Value {
        Reader::new(bytes, false).unserialize().unwrap()
    }

    fn sample() -> Value {
        let day = NaiveDate::from_ymd_opt(2023, 12, 31).unwrap();
        let profile = Map::default();
        profile.insert("city".into(), "Zürich".into());
        profile.insert("score".into(), Value::Double(-12.75));
        profile.insert(Value::Integer(42), Value::Long(i64::MIN));

        Value::from(vec![
            Value::Null,
            Value::Bool(true),
            Value::Integer(0),
            Value::Integer(i32::MAX),
            Value::Integer(-10),
            Value::Double(f64::INFINITY),
            Value::Double(1e-9),
            Value::from(""),
            Value::from("é"),
            Value::from("a longer string with \"quotes\" and {braces}"),
            Value::from(vec![0u8, b'"', b'}', 255]),
            Value::from(Date::new(day.and_hms_nano_opt(23, 59, 59, 123_456_789).unwrap(), true)),
            Value::Guid(Uuid::from_u128(0x1234_5678_9abc_def0_1234_5678_9abc_def0)),
            Value::Map(profile),
            Value::Object(Object::new(
                "Point",
                vec![("x".into(), 1.into()), ("y".into(), Value::Double(2.5))],
            )),
            Value::Object(Object::new(
                "Point",
                vec![("x".into(), 3.into()), ("y".into(), Value::Null)],
            )),
        ])
    }

    #[test]
    fn test_round_trip_mixed_graph() {
        let original = sample();
        assert_eq!(decode(encode(&original)), original);
    }

    #[test]
    fn test_round_trip_simple_mode() {
        let original = sample();
        let mut writer = Writer::new(true);
        writer.serialize(&original);
        let decoded = Reader::new(writer.into_bytes(), true).unserialize().unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn test_shared_object_fields_stay_shared() {
        let address = Object::new("Address", vec![("street".into(), "Main".into())]);
        let person = Object::new(
            "Person",
            vec![
                ("home".into(), Value::Object(address.clone())),
                ("work".into(), Value::Object(address)),
            ],
        );

        let decoded = decode(encode(&Value::Object(person)));
        let person = decoded.as_object().unwrap();
        let home = person.get("home").unwrap();
        let work = person.get("work").unwrap();
        assert!(home.same_ref(&work));

        // Mutation through one alias is visible through the other.
        home.as_object().unwrap().set("street", "Side".into());
        assert_eq!(work.as_object().unwrap().get("street"), Some(Value::from("Side")));
    }

    #[test]
    fn test_map_containing_itself() {
        let map = Map::default();
        map.insert("self".into(), Value::Map(map.clone()));
        let bytes = encode(&Value::Map(map));
        assert_eq!(bytes, b"m1{s4\"self\"r0;}");

        let decoded = decode(bytes);
        let decoded = decoded.as_map().unwrap();
        assert!(decoded.get("self").unwrap().as_map().unwrap().ptr_eq(decoded));
    }

    #[test]
    fn test_object_cycle_through_list() {
        let node = Object::new("Node", vec![]);
        let children = List::new(vec![Value::Object(node.clone())]);
        node.set("children", Value::List(children));

        let decoded = decode(encode(&Value::Object(node)));
        let node = decoded.as_object().unwrap();
        let children = node.get("children").unwrap();
        let first = children.as_list().unwrap().get(0).unwrap();
        assert!(first.as_object().unwrap().ptr_eq(node));
    }

    #[test]
    fn test_reference_scenarios() {
        assert_eq!(encode(&Value::Integer(5)), vec![0x35]);
        assert_eq!(encode(&Value::from("ab")), b"s2\"ab\"");

        let shared = Value::from("ab");
        let bytes = encode(&Value::from(vec![shared.clone(), shared]));
        assert_eq!(bytes, b"a2{s2\"ab\"r1;}");
    }

    #[test]
    fn test_reference_numbering_counts_anonymous_slots() {
        // Slots: list 0, guid 1, field name "xy" 2, object 3.
        let list = List::default();
        let point = Object::new("P", vec![("xy".into(), Value::Null)]);
        list.push(Value::Guid(Uuid::nil()));
        list.push(Value::Object(point.clone()));
        list.push(Value::Object(point));
        list.push(Value::List(list.clone()));

        let bytes = encode(&Value::List(list));
        assert!(bytes.ends_with(b"r3;r0;}"));
        let decoded = decode(bytes);
        let decoded = decoded.as_list().unwrap();
        assert!(decoded.get(1).unwrap().same_ref(&decoded.get(2).unwrap()));
        assert!(decoded.get(3).unwrap().as_list().unwrap().ptr_eq(decoded));
    }

    #[test]
    fn test_writer_reset_between_messages() {
        let shared = Value::from("abc");
        let mut writer = Writer::new(false);
        writer.serialize(&shared);
        writer.serialize(&shared);
        writer.reset();
        writer.serialize(&shared);
        assert_eq!(writer.buffer().as_slice(), b"s3\"abc\"r0;s3\"abc\"");

        let mut reader = Reader::new(writer.into_bytes(), false);
        reader.unserialize().unwrap();
        reader.unserialize().unwrap();
        reader.reset();
        assert_eq!(reader.unserialize().unwrap(), Value::from("abc"));
    }
}
