//! Credential tests
//!
//! Objects written through a mount are owned by whichever account the mount
//! authenticated as: the driver's own (Bart) or the one in a volume Secret.

mod common;

use anyhow::ensure;
use common::*;
use s3_csi_e2e::driver::TestVolume;

const SUITE: &str = "credentials";

async fn assert_object_owner(
    bucket: &s3_csi_e2e::s3::TestBucket,
    key: &str,
    expected: &TestAccount,
) -> anyhow::Result<()> {
    let keys = bucket.list_objects(None).await?;
    ensure!(
        keys.iter().any(|k| k == key),
        "{} missing from bucket {}: {:?}",
        key,
        bucket.name,
        keys
    );

    let owner = bucket.get_object_owner_id(key).await?;
    ensure!(
        owner == expected.canonical_id,
        "Object {} is owned by {}, expected {} ({})",
        key,
        owner,
        expected.canonical_id,
        expected.access_key_id
    );
    Ok(())
}

e2e_test!(test_default_credentials_own_objects, SUITE, SecurityLevel::Restricted, |ctx| {
    let volume = ctx.create_volume(&non_root_mount_options()).await?;
    let pod = create_non_root_pod(ctx, &[volume.claim_name()]).await?;

    let key = "pod-write-default.txt";
    write_and_verify_file(
        ctx.client(),
        &pod,
        &format!("{}/{key}", volume_path(1)),
        "hello default",
    )
    .await?;

    assert_object_owner(&volume.volume.bucket, key, &BART).await
});

e2e_test!(test_secret_credentials_own_objects, SUITE, SecurityLevel::Restricted, |ctx| {
    let lisa = LISA.credentials();
    let bucket = ctx.create_bucket_as(&lisa).await?;
    let secret = ctx.create_secret("lisa-cred", &lisa).await?;

    let volume = TestVolume::new(bucket).with_secret(ctx.namespace(), secret);
    let volume = ctx
        .create_volume_for(volume, &non_root_mount_options())
        .await?;
    let pod = create_non_root_pod(ctx, &[volume.claim_name()]).await?;

    let key = "pod-write.txt";
    write_and_verify_file(
        ctx.client(),
        &pod,
        &format!("{}/{key}", volume_path(1)),
        "hello lisa",
    )
    .await?;

    assert_object_owner(&volume.volume.bucket, key, &LISA).await
});

e2e_test!(test_invalid_access_key_fails_mount, SUITE, SecurityLevel::Restricted, |ctx| {
    let spec = NegativeCredentialTestSpec {
        bucket_owner: LISA.credentials(),
        pod_credentials: s3_csi_e2e::s3::S3Credentials::new(
            format!("invalid{}", short_id()),
            format!("veryInvalidKey{}", short_id()),
        ),
        expected_error: "Forbidden: The AWS access key Id you provided does not exist in our records"
            .to_string(),
        description: "non-existent access key causing authentication failure".to_string(),
        pod_name: Some(format!("test-invalid-key-{}", short_id())),
    };
    run_negative_credential_test(ctx, &spec).await
});

e2e_test!(test_foreign_bucket_fails_mount, SUITE, SecurityLevel::Restricted, |ctx| {
    let spec = NegativeCredentialTestSpec {
        bucket_owner: BART.credentials(),
        pod_credentials: LISA.credentials(),
        expected_error: "Access Denied Error: Failed to create mount process".to_string(),
        description: "valid credentials without permission to access bucket".to_string(),
        pod_name: Some(format!("test-access-denied-{}", short_id())),
    };
    run_negative_credential_test(ctx, &spec).await
});
