//! File permission tests
//!
//! Modes and ownership reported through the mount for files and directories

mod common;

use common::*;

e2e_test!(
    test_default_file_permissions,
    "filepermissions",
    SecurityLevel::Restricted,
    |ctx| {
        let (uid, gid) = non_root_ids();
        let options = non_root_mount_options().with("debug");
        let volume = ctx.create_volume(&options).await?;

        let pod = create_non_root_pod(ctx, &[volume.claim_name()]).await?;

        let base = volume_path(1);
        let file = format!("{base}/testfile.txt");
        let dir = format!("{base}/testdir");
        create_file_in_pod(ctx.client(), &pod, &file, "test content").await?;
        create_dir_in_pod(ctx.client(), &pod, &dir).await?;

        assert_mode(ctx.client(), &pod, &file, "644").await?;
        assert_mode(ctx.client(), &pod, &dir, "755").await?;
        assert_owner(ctx.client(), &pod, &file, uid, gid).await?;
        Ok(())
    }
);

e2e_test!(
    test_file_mode_option,
    "filepermissions",
    SecurityLevel::Restricted,
    |ctx| {
        let (uid, gid) = non_root_ids();
        let options =
            build_volume_with_options(DEFAULT_NON_ROOT_USER, DEFAULT_NON_ROOT_GROUP, Some("0600"), &[]);
        let volume = ctx.create_volume(&options).await?;

        let pod = create_non_root_pod(ctx, &[volume.claim_name()]).await?;

        let (file, dir) = create_test_file_and_dir(ctx.client(), &pod, &volume_path(1), "mode").await?;

        // file-mode only touches files
        assert_mode(ctx.client(), &pod, &file, "600").await?;
        assert_mode(ctx.client(), &pod, &dir, "755").await?;
        assert_owner(ctx.client(), &pod, &file, uid, gid).await?;
        Ok(())
    }
);

e2e_test!(
    test_file_mode_ignores_pod_identity,
    "filepermissions",
    SecurityLevel::Restricted,
    |ctx| {
        let options = build_volume_with_options(3000, 4000, Some("0600"), &[]);
        let volume = ctx.create_volume(&options).await?;

        let writer = ctx
            .pod_builder()
            .claim(volume.claim_name())
            .non_root(3000, 4000)
            .build();
        let (_, writer) = ctx.create_pod(writer).await?;

        let file = format!("{}/owned-elsewhere.txt", volume_path(1));
        create_file_in_pod(ctx.client(), &writer, &file, "content").await?;
        assert_identity(ctx.client(), &writer, 3000, 4000).await?;
        assert_mode(ctx.client(), &writer, &file, "600").await?;
        assert_owner(ctx.client(), &writer, &file, 3000, 4000).await?;
        Ok(())
    }
);

e2e_test!(
    test_object_owner_matches_writer,
    "filepermissions",
    SecurityLevel::Restricted,
    |ctx| {
        let volume = ctx.create_volume(&non_root_mount_options()).await?;
        let pod = create_non_root_pod(ctx, &[volume.claim_name()]).await?;

        let key = format!("owner-{}.txt", short_id());
        create_file_in_pod(ctx.client(), &pod, &format!("{}/{key}", volume_path(1)), "owned").await?;

        let owner = volume.volume.bucket.get_object_owner_id(&key).await?;
        anyhow::ensure!(
            owner == BART.canonical_id,
            "Object {} is owned by {}, expected the driver account {}",
            key,
            owner,
            BART.canonical_id
        );
        Ok(())
    }
);
