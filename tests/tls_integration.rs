//! TLS layering against an in-process OpenSSL server

use std::io::{Read, Write};
use std::net::TcpListener;
use std::thread;
use std::time::Duration;

use openssl::asn1::Asn1Time;
use openssl::bn::BigNum;
use openssl::hash::MessageDigest;
use openssl::pkey::{PKey, Private};
use openssl::rsa::Rsa;
use openssl::ssl::{Ssl, SslContext, SslContextBuilder, SslMethod};
use openssl::x509::{X509, X509NameBuilder};

use netclient::net::{poll_fd, Client, Error, Progress, TlsConfig};

fn self_signed() -> (X509, PKey<Private>) {
    let rsa = Rsa::generate(2048).unwrap();
    let key = PKey::from_rsa(rsa).unwrap();

    let mut name = X509NameBuilder::new().unwrap();
    name.append_entry_by_text("CN", "localhost").unwrap();
    let name = name.build();

    let mut builder = X509::builder().unwrap();
    builder.set_version(2).unwrap();
    let serial = BigNum::from_u32(1).unwrap().to_asn1_integer().unwrap();
    builder.set_serial_number(&serial).unwrap();
    builder.set_subject_name(&name).unwrap();
    builder.set_issuer_name(&name).unwrap();
    builder
        .set_not_before(&Asn1Time::days_from_now(0).unwrap())
        .unwrap();
    builder
        .set_not_after(&Asn1Time::days_from_now(1).unwrap())
        .unwrap();
    builder.set_pubkey(&key).unwrap();
    builder.sign(&key, MessageDigest::sha256()).unwrap();
    (builder.build(), key)
}

fn server_ctx() -> SslContext {
    let (cert, key) = self_signed();
    let mut builder = SslContextBuilder::new(SslMethod::tls_server()).unwrap();
    builder.set_certificate(&cert).unwrap();
    builder.set_private_key(&key).unwrap();
    builder.build()
}

/// Accept one TLS connection and echo 4 bytes
fn spawn_tls_echo(listener: TcpListener) -> thread::JoinHandle<()> {
    let ctx = server_ctx();
    thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        let ssl = Ssl::new(&ctx).unwrap();
        let mut stream = ssl.accept(stream).unwrap();
        let mut buf = [0u8; 4];
        stream.read_exact(&mut buf).unwrap();
        stream.write_all(&buf).unwrap();
    })
}

#[test]
fn test_tls_connect_and_echo() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = spawn_tls_echo(listener);

    let client = Client::builder()
        .tls(TlsConfig::builder().build().unwrap())
        .timeout(Duration::from_secs(5))
        .build();

    let mut stream = client.connect("127.0.0.1", addr.port()).unwrap();
    assert!(stream.is_tls());
    stream.write_all(b"data").unwrap();
    let mut buf = [0u8; 4];
    stream.read_exact(&mut buf).unwrap();
    assert_eq!(&buf, b"data");

    handle.join().unwrap();
}

#[test]
fn test_tls_against_plain_listener_fails() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();

    let handle = thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        // not a TLS server hello
        stream.write_all(b"HTTP/1.0 400 Bad Request\r\n\r\n").unwrap();
        let mut sink = Vec::new();
        let _ = stream.read_to_end(&mut sink);
    });

    let client = Client::builder()
        .tls(TlsConfig::builder().build().unwrap())
        .timeout(Duration::from_secs(5))
        .build();

    let err = client.connect("127.0.0.1", addr.port()).unwrap_err();
    assert!(matches!(err, Error::Tls(_)));

    handle.join().unwrap();
}

#[test]
fn test_nonblocking_tls_handshake() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = spawn_tls_echo(listener);

    let client = Client::builder()
        .tls(TlsConfig::builder().build().unwrap())
        .timeout(Duration::from_secs(5))
        .build();

    let mut pending = client.start_connect("127.0.0.1", addr.port());
    while let Progress::Pending(interest) = pending.drive() {
        let fd = pending.as_raw_fd().unwrap();
        poll_fd(fd, interest.into(), Some(Duration::from_secs(5))).unwrap();
    }

    let mut stream = pending.take_result().unwrap().unwrap();
    assert!(stream.is_tls());
    stream.set_nonblocking(false).unwrap();
    stream.write_all(b"nblk").unwrap();
    let mut buf = [0u8; 4];
    stream.read_exact(&mut buf).unwrap();
    assert_eq!(&buf, b"nblk");

    handle.join().unwrap();
}

#[test]
fn test_client_cert_file_loading() {
    let (cert, key) = self_signed();
    let mut pem = key.private_key_to_pem_pkcs8().unwrap();
    pem.extend_from_slice(&cert.to_pem().unwrap());

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("client.pem");
    std::fs::write(&path, &pem).unwrap();

    TlsConfig::builder().cert_file(&path).unwrap().build().unwrap();
}
