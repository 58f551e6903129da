//! End-to-end scenarios against `Filesystem` backed by the in-memory
//! collaborators, covering the concrete scenarios a filesystem core
//! like this one is expected to get right: basic put/get, the
//! inline-to-HAMT sharding transition, paginated listing, per-file
//! encryption, same-name file/directory coexistence, and the CID
//! surface.

use std::sync::Arc;

use bytes::Bytes;

use hfs::{EncryptionRequest, Filesystem, Kind, PutOptions, Value};
use hfs_core::identity::{Identity, SeedIdentity};
use hfs_core::registry::Registry;
use hfs_core::store::BlobStore;
use hfs_core::testutil::{MemoryBlobStore, MemoryRegistry};

struct Harness {
    fs: Filesystem,
    identity: Arc<SeedIdentity>,
    blob_store: Arc<dyn BlobStore>,
    registry: Arc<dyn Registry>,
}

fn new_fs(seed: &[u8]) -> Harness {
    let identity = Arc::new(SeedIdentity::from_seed(seed));
    let blob_store: Arc<dyn BlobStore> = Arc::new(MemoryBlobStore::new());
    let registry: Arc<dyn Registry> = Arc::new(MemoryRegistry::new());
    let fs = Filesystem::new(identity.clone(), blob_store.clone(), registry.clone());
    Harness {
        fs,
        identity,
        blob_store,
        registry,
    }
}

impl Harness {
    async fn load_dir(&self, segments: &[&str]) -> (hfs::DirV1, u64) {
        let keychain = hfs::KeyChain::derive(self.identity.as_ref(), segments);
        let pk = self.identity.public_key_for(&keychain.leaf());
        hfs::transaction::load_current(&self.blob_store, &self.registry, pk)
            .await
            .unwrap()
    }
}

#[tokio::test]
async fn put_get_and_metadata_round_trip() {
    let h = new_fs(b"scenario 1");
    h.fs.put("home/a.txt", Value::Bytes(Bytes::from_static(b"Hello")), None)
        .await
        .unwrap();

    let got = h.fs.get("home/a.txt").await.unwrap().unwrap();
    assert_eq!(got, Value::Bytes(Bytes::from_static(b"Hello")));

    let meta = h.fs.get_metadata("home/a.txt").await.unwrap().unwrap();
    assert_eq!(meta.kind, Kind::File);
    assert_eq!(meta.size, Some(5));

    assert!(h.fs.get("home/missing.txt").await.unwrap().is_none());
    assert!(h.fs.get_metadata("home/missing.txt").await.unwrap().is_none());
}

#[tokio::test]
async fn large_directory_shards_and_stays_readable() {
    let h = new_fs(b"scenario 2");

    for i in 0..1200u32 {
        let path = format!("home/large/file{i}.txt");
        let body = format!("This is file {i}");
        h.fs.put(&path, Value::Bytes(Bytes::from(body)), None).await.unwrap();
    }

    let meta = h.fs.get_metadata("home/large").await.unwrap().unwrap();
    assert_eq!(meta.kind, Kind::Directory);

    // Inspect the raw DirV1 to confirm the sharding transition itself,
    // since `Metadata` doesn't surface the sharding descriptor.
    let (dir, _) = h.load_dir(&["home", "large"]).await;
    let sharding = dir.header.sharding.expect("directory with 1200 entries must be sharded");
    assert_eq!(sharding.root.total_entries, 1200);
    assert!(sharding.root.depth >= 1);

    let f500 = h.fs.get("home/large/file500.txt").await.unwrap().unwrap();
    assert_eq!(f500, Value::Bytes(Bytes::from("This is file 500")));
    let f1199 = h.fs.get("home/large/file1199.txt").await.unwrap().unwrap();
    assert_eq!(f1199, Value::Bytes(Bytes::from("This is file 1199")));
}

#[tokio::test]
async fn sharding_activates_at_exactly_threshold_plus_one() {
    let h = new_fs(b"scenario 2b");
    let config = hfs::HamtConfig {
        max_inline_entries: 4,
        ..Default::default()
    };
    let fs = h.fs.clone().with_hamt_config(config);

    for i in 0..4u32 {
        fs.put(&format!("d/{i}"), Value::Bytes(Bytes::from_static(b"x")), None)
            .await
            .unwrap();
    }
    let (dir, _) = h.load_dir(&["d"]).await;
    assert!(!dir.is_sharded(), "4 entries at threshold 4 must stay inline");

    fs.put("d/4", Value::Bytes(Bytes::from_static(b"x")), None).await.unwrap();
    let (dir, _) = h.load_dir(&["d"]).await;
    assert!(dir.is_sharded(), "5th entry over threshold 4 must shard");
}

#[tokio::test]
async fn paginated_listing_is_disjoint_and_deterministic() {
    let h = new_fs(b"scenario 3");
    for i in 0..1200u32 {
        let path = format!("home/large/file{i}.txt");
        h.fs.put(&path, Value::Bytes(Bytes::from_static(b"x")), None).await.unwrap();
    }

    let (first, cursor1) = h.fs.list("home/large", 10, None).await.unwrap();
    assert_eq!(first.len(), 10);
    let cursor1 = cursor1.expect("more than 10 entries remain");

    let (second, _cursor2) = h.fs.list("home/large", 5, Some(&cursor1)).await.unwrap();
    assert_eq!(second.len(), 5);

    let first_names: std::collections::HashSet<_> = first.iter().map(|e| e.name.clone()).collect();
    let second_names: std::collections::HashSet<_> = second.iter().map(|e| e.name.clone()).collect();
    assert!(first_names.is_disjoint(&second_names));

    // Re-running the same two calls must reproduce the identical pages.
    let (first_again, cursor1_again) = h.fs.list("home/large", 10, None).await.unwrap();
    assert_eq!(first, first_again);
    assert_eq!(cursor1_again.as_deref(), Some(cursor1.as_str()));
}

#[tokio::test]
async fn encryption_round_trips_and_detects_tampering() {
    let h = new_fs(b"scenario 4");
    let plaintext = vec![0x42u8; 300 * 1024];
    h.fs
        .put(
            "home/s/secret.txt",
            Value::Bytes(Bytes::from(plaintext.clone())),
            Some(PutOptions {
                media_type: None,
                encryption: Some(EncryptionRequest::default()),
            }),
        )
        .await
        .unwrap();

    let got = h.fs.get("home/s/secret.txt").await.unwrap().unwrap();
    assert_eq!(got, Value::Bytes(Bytes::from(plaintext)));

    // A single corrupted ciphertext byte must surface as a typed
    // decryption failure, not a silent data mismatch.
    let (dir, _) = h.load_dir(&["home", "s"]).await;
    let file_ref = hfs::directory_ops::lookup_file(&dir, &h.blob_store, "secret.txt")
        .await
        .unwrap()
        .unwrap();
    let hash = hfs_core::hash::Hash::from_bytes(file_ref.hash);
    let original = h.blob_store.download_blob_as_bytes(hash).await.unwrap();
    let mut corrupted = original.to_vec();
    corrupted[0] ^= 0xff;
    let err = hfs::encryption::decrypt_envelope(&file_ref.enc.unwrap(), &corrupted).unwrap_err();
    assert!(matches!(err, hfs::FsError::DecryptionFailed));
}

#[tokio::test]
async fn file_and_directory_of_the_same_name_coexist() {
    let h = new_fs(b"scenario 5");
    h.fs.put("home/mix/config", Value::Bytes(Bytes::from_static(b"file-body")), None)
        .await
        .unwrap();
    h.fs.create_directory("home/mix", "config").await.unwrap();

    let (entries, _) = h.fs.list("home/mix", 10, None).await.unwrap();
    assert_eq!(entries.len(), 2);
    assert!(entries.iter().any(|e| e.kind == Kind::File));
    assert!(entries.iter().any(|e| e.kind == Kind::Directory));
    assert!(entries.iter().all(|e| e.name == "config"));
}

#[tokio::test]
async fn cid_round_trip_and_stable_content_addressing() {
    let h = new_fs(b"scenario 6");
    let (path, cid) = h
        .fs
        .put_with_cid("home/x", Value::Bytes(Bytes::from_static(b"k")), None)
        .await
        .unwrap();
    assert_eq!(path, "home/x");

    assert_eq!(h.fs.get_by_cid(cid).await.unwrap(), Bytes::from_static(b"k"));
    assert_eq!(h.fs.path_to_cid("home/x").await.unwrap(), Some(cid));
    assert_eq!(h.fs.cid_to_path(cid), Some("home/x".to_string()));

    let (path2, cid2) = h
        .fs
        .put_with_cid("home/y", Value::Bytes(Bytes::from_static(b"k")), None)
        .await
        .unwrap();
    assert_eq!(path2, "home/y");
    assert_eq!(cid, cid2, "identical bytes at a different path share a CID");
}

#[tokio::test]
async fn put_is_idempotent_and_bumps_revision_by_exactly_one() {
    let h = new_fs(b"scenario idem");

    h.fs.put("a.txt", Value::Bytes(Bytes::from_static(b"v1")), None).await.unwrap();
    let (_, rev1) = h.load_dir(&[]).await;

    h.fs.put("a.txt", Value::Bytes(Bytes::from_static(b"v1")), None).await.unwrap();
    let (dir2, rev2) = h.load_dir(&[]).await;

    assert_eq!(rev2, rev1 + 1);
    let file = dir2.files.get("a.txt").unwrap();
    assert_eq!(
        h.blob_store
            .download_blob_as_bytes(hfs_core::hash::Hash::from_bytes(file.hash))
            .await
            .unwrap(),
        Bytes::from_static(b"v1")
    );
}

#[tokio::test]
async fn delete_removes_entries_and_create_directory_is_idempotent() {
    let h = new_fs(b"scenario delete");
    h.fs.put("a/b.txt", Value::Bytes(Bytes::from_static(b"x")), None).await.unwrap();
    assert!(h.fs.delete("a/b.txt").await.unwrap());
    assert!(!h.fs.delete("a/b.txt").await.unwrap());
    assert!(h.fs.get("a/b.txt").await.unwrap().is_none());

    h.fs.create_directory("", "nested").await.unwrap();
    h.fs.create_directory("", "nested").await.unwrap();
    let meta = h.fs.get_metadata("nested").await.unwrap().unwrap();
    assert_eq!(meta.kind, Kind::Directory);
}

#[tokio::test]
async fn structured_value_round_trips_with_cbor_media_type() {
    let h = new_fs(b"scenario structured");
    // `Value::Structured` carries bytes the caller already encoded with
    // the codec; the facade only tags and stores them, so any byte
    // sequence exercises the media-type round trip.
    let buf = vec![0xa1, 0x01, 0x02];
    h.fs.put("data.cbor", Value::Structured(buf.clone()), None).await.unwrap();

    let got = h.fs.get("data.cbor").await.unwrap().unwrap();
    assert_eq!(got, Value::Structured(buf));
    let meta = h.fs.get_metadata("data.cbor").await.unwrap().unwrap();
    assert_eq!(meta.media_type.as_deref(), Some("application/cbor"));
}

#[tokio::test]
async fn custom_retry_budget_is_honored_on_uncontended_writes() {
    let h = new_fs(b"scenario retry");
    let fs = h.fs.clone().with_retry_budget(hfs::RetryConfig {
        max_attempts: 1,
        backoff: std::time::Duration::from_millis(1),
    });

    // A single writer never actually contends with itself, so even a
    // one-attempt budget must succeed end to end.
    fs.put("only.txt", Value::Bytes(Bytes::from_static(b"v")), None)
        .await
        .unwrap();
    assert_eq!(
        fs.get("only.txt").await.unwrap(),
        Some(Value::Bytes(Bytes::from_static(b"v")))
    );
}
