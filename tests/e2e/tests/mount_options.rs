//! Mount option tests
//!
//! Non-root access, flags the driver strips before mounting, `read-only`
//! and `prefix`.

mod common;

use anyhow::ensure;
use common::*;

const SUITE: &str = "mountoptions";

e2e_test!(test_non_root_access, SUITE, SecurityLevel::Restricted, |ctx| {
    let (uid, gid) = non_root_ids();
    let volume = ctx.create_volume(&non_root_mount_options()).await?;
    let pod = create_non_root_pod(ctx, &[volume.claim_name()]).await?;
    assert_identity(ctx.client(), &pod, uid, gid).await?;

    let (file, dir) =
        create_test_file_and_dir(ctx.client(), &pod, &volume_path(1), "non-root").await?;
    let expected_file = FileStat {
        mode: "644".to_string(),
        gid,
        uid,
    };
    let expected_dir = FileStat {
        mode: "755".to_string(),
        ..expected_file.clone()
    };
    ensure!(stat(ctx.client(), &pod, &file).await? == expected_file);
    ensure!(stat(ctx.client(), &pod, &dir).await? == expected_dir);

    check_basic_file_operations(ctx.client(), &pod, &volume_path(1), rand::random()).await?;
    Ok(())
});

/// Mount with `flags` and prove the volume still works as configured
async fn check_stripped_flags(ctx: &TestContext<'_>, flags: &[&str]) -> anyhow::Result<()> {
    let (uid, gid) = non_root_ids();
    let options = build_volume_with_options(DEFAULT_NON_ROOT_USER, DEFAULT_NON_ROOT_GROUP, None, flags);
    let volume = ctx.create_volume(&options).await?;
    let pod = create_non_root_pod(ctx, &[volume.claim_name()]).await?;

    let base = volume_path(1);
    write_and_verify_file(
        ctx.client(),
        &pod,
        &format!("{base}/policy-ok.txt"),
        &format!("policy-strip {}", flags.join(" ")),
    )
    .await?;

    let dir = format!("{base}/test-dir");
    create_dir_in_pod(ctx.client(), &pod, &dir).await?;
    assert_mode(ctx.client(), &pod, &dir, "755").await?;
    assert_owner(ctx.client(), &pod, &dir, uid, gid).await?;
    Ok(())
}

const UNSUPPORTED_FLAGS: [&str; 5] = [
    "--endpoint-url=https://wrong.example.com",
    "--cache-xz",
    "--incremental-upload",
    "--storage-class=EXPRESS_ONEZONE",
    "--profile=my-aws-profile",
];

e2e_test!(test_strips_endpoint_url, SUITE, SecurityLevel::Restricted, |ctx| {
    check_stripped_flags(ctx, &UNSUPPORTED_FLAGS[0..1]).await
});

e2e_test!(test_strips_cache_xz, SUITE, SecurityLevel::Restricted, |ctx| {
    check_stripped_flags(ctx, &UNSUPPORTED_FLAGS[1..2]).await
});

e2e_test!(test_strips_incremental_upload, SUITE, SecurityLevel::Restricted, |ctx| {
    check_stripped_flags(ctx, &UNSUPPORTED_FLAGS[2..3]).await
});

e2e_test!(test_strips_storage_class, SUITE, SecurityLevel::Restricted, |ctx| {
    check_stripped_flags(ctx, &UNSUPPORTED_FLAGS[3..4]).await
});

e2e_test!(test_strips_profile, SUITE, SecurityLevel::Restricted, |ctx| {
    check_stripped_flags(ctx, &UNSUPPORTED_FLAGS[4..5]).await
});

e2e_test!(test_strips_all_unsupported_flags, SUITE, SecurityLevel::Restricted, |ctx| {
    check_stripped_flags(ctx, &UNSUPPORTED_FLAGS).await
});

e2e_test!(test_read_only_rejects_writes, SUITE, SecurityLevel::Restricted, |ctx| {
    let options = build_volume_with_options(
        DEFAULT_NON_ROOT_USER,
        DEFAULT_NON_ROOT_GROUP,
        None,
        &["read-only"],
    );
    let volume = ctx.create_volume(&options).await?;
    let pod = create_non_root_pod(ctx, &[volume.claim_name()]).await?;

    let base = volume_path(1);
    ctx.run(&pod, &format!("ls -la {}", shell_quote(&base))).await?;

    for command in [
        format!("touch {}", shell_quote(&format!("{base}/test-file.txt"))),
        format!("mkdir -p {}", shell_quote(&format!("{base}/test-dir"))),
    ] {
        assert_fails_with(ctx.client(), &pod, &command, &["Read-only file system"]).await?;
    }
    Ok(())
});

e2e_test!(test_region_option, SUITE, SecurityLevel::Restricted, |ctx| {
    let (uid, gid) = non_root_ids();
    let options = build_volume_with_options(
        DEFAULT_NON_ROOT_USER,
        DEFAULT_NON_ROOT_GROUP,
        None,
        &["region=sa-east-1"],
    );
    let volume = ctx.create_volume(&options).await?;
    let pod = create_non_root_pod(ctx, &[volume.claim_name()]).await?;

    let file = format!("{}/region-test.txt", volume_path(1));
    write_and_verify_file(ctx.client(), &pod, &file, "Testing region option").await?;
    assert_mode(ctx.client(), &pod, &file, "644").await?;
    assert_owner(ctx.client(), &pod, &file, uid, gid).await?;
    Ok(())
});

fn prefix_options(prefix: &str) -> MountOptions {
    build_volume_with_options(
        DEFAULT_NON_ROOT_USER,
        DEFAULT_NON_ROOT_GROUP,
        None,
        &[&format!("prefix={prefix}")],
    )
}

e2e_test!(test_mount_does_not_create_prefix, SUITE, SecurityLevel::Restricted, |ctx| {
    let prefix = "empty-prefix/";
    let volume = ctx.create_volume(&prefix_options(prefix)).await?;
    let bucket = &volume.volume.bucket;
    ensure!(
        bucket.list_objects(Some(prefix)).await?.is_empty(),
        "Prefix {} exists before mounting",
        prefix
    );

    let pod = create_non_root_pod(ctx, &[volume.claim_name()]).await?;
    ctx.run(&pod, &format!("ls -la {}", shell_quote(&volume_path(1)))).await?;

    let keys = bucket.list_objects(Some(prefix)).await?;
    ensure!(keys.is_empty(), "Mounting created {:?} under {}", keys, prefix);
    Ok(())
});

e2e_test!(test_files_stored_under_prefix, SUITE, SecurityLevel::Restricted, |ctx| {
    let prefix = "test-prefix/";
    let volume = ctx.create_volume(&prefix_options(prefix)).await?;
    let pod = create_non_root_pod(ctx, &[volume.claim_name()]).await?;

    let name = "prefix-test.txt";
    write_and_verify_file(
        ctx.client(),
        &pod,
        &format!("{}/{name}", volume_path(1)),
        "Testing prefix mount option",
    )
    .await?;

    let bucket = &volume.volume.bucket;
    bucket.verify_objects_exist(&[format!("{prefix}{name}")]).await?;
    let outside: Vec<String> = bucket
        .list_objects(None)
        .await?
        .into_iter()
        .filter(|key| !key.starts_with(prefix))
        .collect();
    ensure!(outside.is_empty(), "Objects outside {}: {:?}", prefix, outside);
    Ok(())
});

e2e_test!(test_prefix_visible_both_ways, SUITE, SecurityLevel::Restricted, |ctx| {
    let prefix = "test-both-directions/";
    let volume = ctx.create_volume(&prefix_options(prefix)).await?;
    let bucket = &volume.volume.bucket;

    let direct = bucket.create_objects(prefix, 3).await?;
    bucket.verify_objects_exist(&direct).await?;

    let pod = create_non_root_pod(ctx, &[volume.claim_name()]).await?;
    let base = volume_path(1);
    for key in &direct {
        let name = key.trim_start_matches(prefix);
        assert_exists(ctx.client(), &pod, &format!("{base}/{name}")).await?;
    }

    let mut created = Vec::new();
    for name in ["mount-file1.txt", "mount-file2.txt"] {
        create_file_in_pod(ctx.client(), &pod, &format!("{base}/{name}"), "created through the mount").await?;
        created.push(format!("{prefix}{name}"));
    }
    bucket.verify_objects_exist(&created).await?;
    Ok(())
});
