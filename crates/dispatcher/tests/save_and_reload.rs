use bytes::Bytes;
use dispatcher::{dispatch, ServerInfo};
use kvstore::Store;
use tempfile::tempdir;

fn args(words: &[&str]) -> Vec<Bytes> {
    words.iter().map(|w| Bytes::copy_from_slice(w.as_bytes())).collect()
}

#[test]
fn save_writes_a_snapshot_that_rdb_can_reload() {
    let dir = tempdir().unwrap();
    let mut store = Store::new();
    let mut info = ServerInfo::new_master(dir.path().to_path_buf(), "dump.rdb".into(), 6379);

    dispatch(&mut store, &mut info, &args(&["SET", "a", "1"]));
    dispatch(&mut store, &mut info, &args(&["SET", "b", "2"]));
    let out = dispatch(&mut store, &mut info, &args(&["SAVE"]));
    assert_eq!(out.reply, b"+OK\r\n");

    let mut reloaded = Store::new();
    let outcome = rdb::load(&mut reloaded, dir.path(), "dump.rdb").unwrap();
    assert_eq!(outcome, rdb::LoadOutcome::Loaded);
    assert_eq!(reloaded.dbsize(), 2);
}
