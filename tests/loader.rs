//! End-to-end behaviour of `DecryptingLoader` over in-memory and file sources.

mod common;

use block_loader::{
    ConfigBuilder, DecryptingLoader, Encryption, Error, Loader, LoaderConfig, MemorySource,
    ReaderSource, SeekMode, SyncBytePlaintext, BLOCK_SIZE, HEADER_SIZE,
};
use common::{build_file, expected_output, make_header, payload, KeystreamOracle};
use rand::Rng;

type MemoryLoader = DecryptingLoader<MemorySource, KeystreamOracle>;

fn loader_for(file: Vec<u8>, plan: &[usize]) -> (MemoryLoader, KeystreamOracle) {
    loader_with_config(file, plan, LoaderConfig::default())
}

fn loader_with_config(
    file: Vec<u8>,
    plan: &[usize],
    config: LoaderConfig,
) -> (MemoryLoader, KeystreamOracle) {
    let oracle = KeystreamOracle::new();
    let source = MemorySource::new(file).with_chunk_plan(plan.to_vec());
    (DecryptingLoader::new(source, oracle.clone(), config), oracle)
}

/// Reads to the end, checking the alignment invariant after every call.
async fn read_all<L>(loader: &mut DecryptingLoader<L, KeystreamOracle>, buf_size: usize) -> Vec<u8>
where
    L: block_loader::ByteSource,
{
    let mut out = Vec::new();
    let mut buf = vec![0u8; buf_size];
    loop {
        let n = loader.read(&mut buf).await.unwrap();
        if let Some(session) = loader.session() {
            assert!(session.aligned_backlog() < BLOCK_SIZE);
        }
        if n == 0 {
            return out;
        }
        out.extend_from_slice(&buf[..n]);
    }
}

// --- Alignment ---

#[tokio::test]
async fn test_output_independent_of_chunking() {
    let plain = payload(BLOCK_SIZE * 5 + 1234);
    let file = build_file(&plain, true);
    let expected = expected_output(&plain, true);

    let mut rng = rand::rng();
    let mut plans: Vec<Vec<usize>> = vec![
        vec![],
        vec![1],
        vec![511, 2],
        vec![BLOCK_SIZE],
        vec![HEADER_SIZE, BLOCK_SIZE],
        vec![300, 9000, 7000],
    ];
    for _ in 0..8 {
        plans.push((0..6).map(|_| rng.random_range(1..20_000)).collect());
    }

    for plan in plans {
        for buf_size in [100, 4096, BLOCK_SIZE, 3 * BLOCK_SIZE + 17] {
            let (mut loader, oracle) = loader_for(file.clone(), &plan);
            loader.open().await.unwrap();

            let out = read_all(&mut loader, buf_size).await;
            assert_eq!(out, expected, "plan {plan:?}, buffer {buf_size}");
            assert!(oracle
                .decrypt_lengths()
                .iter()
                .all(|len| len % BLOCK_SIZE == 0 && *len > 0));
        }
    }
}

#[tokio::test]
async fn test_partial_chunks_flush_first_block() {
    let plain = payload(BLOCK_SIZE * 2);
    let file = build_file(&plain, true);
    let (mut loader, oracle) = loader_for(file.clone(), &[HEADER_SIZE, 300, 9000, 7000, 84]);
    loader.open().await.unwrap();

    let mut buf = vec![0u8; BLOCK_SIZE];
    assert_eq!(loader.read(&mut buf).await.unwrap(), HEADER_SIZE);
    assert_eq!(&buf[..HEADER_SIZE], &file[..HEADER_SIZE]);

    assert_eq!(loader.read(&mut buf).await.unwrap(), BLOCK_SIZE);
    assert_eq!(&buf[..], &plain[..BLOCK_SIZE]);
    assert_eq!(oracle.seeks(), vec![0]);
    assert_eq!(oracle.decrypt_lengths(), vec![BLOCK_SIZE]);

    let session = loader.session().unwrap();
    assert_eq!(session.aligned_backlog(), 9300 - BLOCK_SIZE);
    assert_eq!(session.position(), (HEADER_SIZE + 9300) as u64);

    // The 7000-byte chunk leaves 8108 bytes parked; the last 84 complete block 1.
    assert_eq!(loader.read(&mut buf).await.unwrap(), BLOCK_SIZE);
    assert_eq!(&buf[..], &plain[BLOCK_SIZE..]);
    assert_eq!(oracle.seeks(), vec![0]);
    assert_eq!(oracle.decrypt_lengths(), vec![BLOCK_SIZE, BLOCK_SIZE]);
    assert_eq!(loader.read(&mut buf).await.unwrap(), 0);
}

#[tokio::test]
async fn test_trailing_partial_block_is_dropped() {
    let plain = payload(BLOCK_SIZE + 700);
    let file = build_file(&plain, true);
    let (mut loader, _) = loader_for(file, &[1000]);
    loader.open().await.unwrap();

    let out = read_all(&mut loader, 4096).await;
    assert_eq!(out.len(), HEADER_SIZE + BLOCK_SIZE);
    assert_eq!(loader.session().unwrap().aligned_backlog(), 0);
    // EOF stays EOF.
    let mut buf = [0u8; 16];
    assert_eq!(loader.read(&mut buf).await.unwrap(), 0);
}

// --- Header ---

#[tokio::test]
async fn test_header_delivered_verbatim_and_alone() {
    let plain = payload(BLOCK_SIZE * 2);
    for encrypted in [true, false] {
        let file = build_file(&plain, encrypted);
        let (mut loader, _) = loader_for(file.clone(), &[]);
        loader.open().await.unwrap();

        let mut header = Vec::new();
        let mut buf = [0u8; 100];
        while header.len() < HEADER_SIZE {
            let n = loader.read(&mut buf).await.unwrap();
            assert!(header.len() + n <= HEADER_SIZE, "header mixed with payload");
            header.extend_from_slice(&buf[..n]);
        }
        assert_eq!(header, make_header(encrypted));
    }
}

#[tokio::test]
async fn test_plaintext_stream_never_touches_oracle() {
    let plain = payload(BLOCK_SIZE * 3 + 77);
    let file = build_file(&plain, false);
    let (mut loader, oracle) = loader_for(file.clone(), &[333]);
    loader.open().await.unwrap();
    assert_eq!(loader.encryption(), Encryption::Plaintext);

    let out = read_all(&mut loader, 5000).await;
    assert_eq!(out, file);
    assert!(oracle.seeks().is_empty());
    assert!(oracle.decrypt_lengths().is_empty());
}

#[tokio::test]
async fn test_short_header_fails_open() {
    let (mut loader, _) = loader_for(vec![0u8; 300], &[128]);
    let err = loader.open().await.unwrap_err();
    assert!(matches!(err, Error::ShortHeader { read: 300 }));
}

#[tokio::test]
async fn test_read_before_open() {
    let (mut loader, _) = loader_for(build_file(&payload(10), true), &[]);
    let mut buf = [0u8; 8];
    assert!(matches!(loader.read(&mut buf).await, Err(Error::NotOpen)));
}

#[tokio::test]
async fn test_decrypt_failure_ends_stream_until_seek() {
    let plain = payload(BLOCK_SIZE * 4);
    let (mut loader, oracle) = loader_for(build_file(&plain, true), &[HEADER_SIZE, BLOCK_SIZE]);
    oracle.fail_nth_decrypt(2, -9);
    loader.open().await.unwrap();

    let mut header = [0u8; HEADER_SIZE];
    loader.read(&mut header).await.unwrap();

    // Block 0 was decrypted before the failure and is still delivered.
    let mut buf = vec![0u8; 2 * BLOCK_SIZE];
    let n = loader.read(&mut buf).await.unwrap();
    assert_eq!(&buf[..n], &plain[..BLOCK_SIZE]);
    assert!(loader.session().unwrap().is_failed());

    // No later block is served out of order.
    for _ in 0..2 {
        let err = loader.read(&mut buf).await.unwrap_err();
        assert!(matches!(err, Error::Oracle { code: -9, .. }));
    }

    let target = (HEADER_SIZE + BLOCK_SIZE) as u64;
    loader.seek(target).await.unwrap();
    let out = read_all(&mut loader, 3000).await;
    assert_eq!(out, plain[BLOCK_SIZE..]);
}

#[tokio::test]
async fn test_decrypt_failure_on_first_block_fails_read() {
    let plain = payload(BLOCK_SIZE * 2);
    let (mut loader, oracle) = loader_for(build_file(&plain, true), &[]);
    oracle.fail_nth_decrypt(1, -4);
    loader.open().await.unwrap();

    let mut header = [0u8; HEADER_SIZE];
    loader.read(&mut header).await.unwrap();
    let mut buf = vec![0u8; BLOCK_SIZE];
    assert!(matches!(
        loader.read(&mut buf).await,
        Err(Error::Oracle { code: -4, .. })
    ));
    assert!(matches!(
        loader.read(&mut buf).await,
        Err(Error::Oracle { code: -4, .. })
    ));

    loader.seek(0).await.unwrap();
    assert_eq!(read_all(&mut loader, 4096).await, expected_output(&plain, true));
}

// --- Plaintext blocks inside an encrypted stream ---

#[tokio::test]
async fn test_sync_byte_blocks_pass_through() {
    let mut plain = payload(BLOCK_SIZE * 3);
    plain[0] = SyncBytePlaintext::MPEG_TS;
    let mut file = build_file(&plain, true);
    // Block 0 is stored in the clear.
    file[HEADER_SIZE..HEADER_SIZE + BLOCK_SIZE].copy_from_slice(&plain[..BLOCK_SIZE]);

    let oracle = KeystreamOracle::new();
    let mut loader = DecryptingLoader::new(
        MemorySource::new(file),
        oracle.clone(),
        LoaderConfig::default(),
    )
    .with_plaintext_blocks(SyncBytePlaintext::default());
    loader.open().await.unwrap();

    let out = read_all(&mut loader, BLOCK_SIZE * 4).await;
    assert_eq!(out, expected_output(&plain, true));
    assert_eq!(oracle.seeks(), vec![1]);
    assert_eq!(oracle.decrypt_lengths(), vec![BLOCK_SIZE * 2]);
}

// --- Seek ---

#[tokio::test]
async fn test_seek_matches_reading_from_start() {
    let plain = payload(BLOCK_SIZE * 4 + 500);
    for encrypted in [true, false] {
        let file = build_file(&plain, encrypted);
        let expected = expected_output(&plain, encrypted);

        for target in [0u64, 1, 100, 511, 512, 513, 8703, 8704, 9000, 20_000, 33_279] {
            let (mut loader, _) = loader_for(file.clone(), &[1500, 7000]);
            loader.open().await.unwrap();
            // Leave state behind in every buffer before seeking.
            let mut buf = [0u8; 2000];
            for _ in 0..3 {
                loader.read(&mut buf).await.unwrap();
            }

            loader.seek(target).await.unwrap();
            let out = read_all(&mut loader, 3000).await;
            assert_eq!(
                out,
                expected[target as usize..],
                "encrypted={encrypted} target={target}"
            );
        }
    }
}

#[tokio::test]
async fn test_seek_aligns_oracle_and_source() {
    let plain = payload(BLOCK_SIZE * 4);
    let file = build_file(&plain, true);
    let oracle = KeystreamOracle::new();
    let source = MemorySource::new(file);
    let reopens = source.reopen_log();
    let mut loader = DecryptingLoader::new(source, oracle.clone(), LoaderConfig::default());
    loader.open().await.unwrap();

    let target = (HEADER_SIZE + 2 * BLOCK_SIZE + 10) as u64;
    loader.seek(target).await.unwrap();

    let boundary = (HEADER_SIZE + 2 * BLOCK_SIZE) as u64;
    assert_eq!(*reopens.lock().unwrap(), vec![0, boundary]);
    assert_eq!(oracle.seeks(), vec![2]);
    assert_eq!(loader.position(), boundary);

    let mut buf = vec![0u8; 100];
    assert_eq!(loader.read(&mut buf).await.unwrap(), 100);
    assert_eq!(&buf[..], &plain[2 * BLOCK_SIZE + 10..2 * BLOCK_SIZE + 110]);
}

#[tokio::test]
async fn test_seek_zero_reclassifies() {
    let plain = payload(BLOCK_SIZE * 2);
    let file = build_file(&plain, true);
    let (mut loader, oracle) = loader_for(file.clone(), &[4000]);
    loader.open().await.unwrap();
    read_all(&mut loader, 1000).await;
    assert_eq!(oracle.classify_count(), 1);

    loader.seek(0).await.unwrap();
    let session = loader.session().unwrap();
    assert_eq!(session.position(), 0);
    assert_eq!(session.aligned_backlog(), 0);
    assert_eq!(session.ready_len(), 0);
    assert_eq!(session.encryption(), Encryption::Unknown);

    let out = read_all(&mut loader, 1000).await;
    assert_eq!(oracle.classify_count(), 2);
    assert_eq!(out, expected_output(&plain, true));
}

#[tokio::test]
async fn test_seek_without_range_support_fails() {
    let file = build_file(&payload(BLOCK_SIZE * 2), true);
    let source = MemorySource::new(file).without_ranges();
    let mut loader = DecryptingLoader::new(source, KeystreamOracle::new(), LoaderConfig::default());
    loader.open().await.unwrap();

    let err = loader.seek(9000).await.unwrap_err();
    assert!(matches!(err, Error::SeekFailed { offset: 8704, .. }));
}

#[tokio::test]
async fn test_streaming_mode_ignores_seek() {
    let plain = payload(BLOCK_SIZE * 2);
    let file = build_file(&plain, true);
    let config = ConfigBuilder::new()
        .set_seek_mode(SeekMode::Streaming)
        .build()
        .unwrap();
    let oracle = KeystreamOracle::new();
    let source = MemorySource::new(file);
    let reopens = source.reopen_log();
    let mut loader = DecryptingLoader::new(source, oracle, config);
    loader.open().await.unwrap();
    assert_eq!(loader.size(), 0);

    let mut header = [0u8; HEADER_SIZE];
    loader.read(&mut header).await.unwrap();
    loader.seek(12_345).await.unwrap();

    let out = read_all(&mut loader, 4096).await;
    assert_eq!(out, plain);
    assert_eq!(*reopens.lock().unwrap(), vec![0]);
}

// --- Size and lifecycle ---

#[tokio::test]
async fn test_size_reports_source_length() {
    let file = build_file(&payload(1000), true);
    let len = file.len() as u64;

    let (mut loader, _) = loader_for(file.clone(), &[]);
    assert_eq!(loader.size(), len);
    // The trailing partial block counts towards the size but is never read.
    loader.open().await.unwrap();
    let delivered = read_all(&mut loader, 4096).await.len() as u64;
    assert_eq!(delivered, HEADER_SIZE as u64);
    assert!(delivered < loader.size());

    let unknown = DecryptingLoader::new(
        MemorySource::new(file).without_size(),
        KeystreamOracle::new(),
        LoaderConfig::default(),
    );
    assert_eq!(unknown.size(), 0);
}

#[tokio::test]
async fn test_stop_releases_oracle_once() {
    let (mut loader, oracle) = loader_for(build_file(&payload(BLOCK_SIZE), true), &[]);
    loader.open().await.unwrap();

    loader.stop();
    loader.stop();
    assert!(loader.is_stopped());
    assert_eq!(oracle.deinit_count(), 1);

    let mut buf = [0u8; 8];
    assert!(matches!(loader.read(&mut buf).await, Err(Error::Stopped)));
    assert!(matches!(loader.seek(0).await, Err(Error::Stopped)));
    assert!(matches!(loader.open().await, Err(Error::Stopped)));

    drop(loader);
    assert_eq!(oracle.deinit_count(), 1);
}

#[tokio::test]
async fn test_drop_releases_oracle() {
    let (loader, oracle) = loader_for(build_file(&payload(10), true), &[]);
    drop(loader);
    assert_eq!(oracle.deinit_count(), 1);
}

#[tokio::test]
async fn test_file_source() {
    let plain = payload(BLOCK_SIZE * 3 + 10);
    let file = build_file(&plain, true);
    let path = std::env::temp_dir().join(format!("block-loader-{}.bin", std::process::id()));
    tokio::fs::write(&path, &file).await.unwrap();

    let source = ReaderSource::from_file(&path).await.unwrap().with_chunk_size(5000);
    let mut loader = DecryptingLoader::new(source, KeystreamOracle::new(), LoaderConfig::default());
    loader.open().await.unwrap();
    assert_eq!(loader.size(), file.len() as u64);

    loader.seek(9000).await.unwrap();
    let out = read_all(&mut loader, 4096).await;
    assert_eq!(out, expected_output(&plain, true)[9000..]);

    tokio::fs::remove_file(&path).await.unwrap();
}
