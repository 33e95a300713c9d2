use bytes::Bytes;
use kvstore::{Store, Value};
use std::thread::sleep;
use std::time::Duration;

#[test]
fn a_key_past_its_absolute_expiration_is_absent_on_next_access() {
    let mut store = Store::new();
    let now = kvstore::now_ms();
    store.set(
        Bytes::from_static(b"foo"),
        Value::Str(Bytes::from_static(b"bar")),
        now + 50,
    );
    assert_eq!(
        store.get_string(b"foo").unwrap(),
        Some(Bytes::from_static(b"bar"))
    );

    sleep(Duration::from_millis(120));

    assert_eq!(store.get_string(b"foo").unwrap(), None);
    assert_eq!(store.dbsize(), 0);
    assert_eq!(store.expiry_count(), 0);
}
