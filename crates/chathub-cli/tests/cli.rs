use assert_cmd::Command;

#[test]
fn token_prints_a_signed_token() {
    let output = Command::cargo_bin("chathub")
        .unwrap()
        .args(["token", "alice", "--secret", "00ff", "--ttl", "60"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let token = String::from_utf8(output.stdout).unwrap();
    let claims = chathub_core::verify_token(&[0x00, 0xff], token.trim()).unwrap();
    assert_eq!(claims.username, "alice");
}

#[test]
fn token_rejects_non_hex_secret() {
    Command::cargo_bin("chathub")
        .unwrap()
        .args(["token", "alice", "--secret", "xyz"])
        .assert()
        .failure();
}
