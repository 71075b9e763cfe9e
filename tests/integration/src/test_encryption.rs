//! Server-side encryption tests: gateway-managed and customer-key modes,
//! range reads off aligned readers, and multipart encryption.

#[cfg(test)]
mod tests {
    use crate::{alice, TestEnv};
    use bytes::Bytes;
    use oxgate_core::{
        CompletePart, GatewayError, PutObjectArgs, SseRequest, StreamPayload,
    };
    use oxgate_meta::SseType;

    const CUSTOMER_KEY: [u8; 32] = [0u8; 32];

    #[tokio::test]
    async fn test_should_roundtrip_gateway_managed_encryption() {
        let env = TestEnv::new().await;
        let bucket = env.create_bucket("sse").await;
        let body = b"secret payload".to_vec();

        env.put_with(
            &bucket,
            "k",
            &body,
            PutObjectArgs {
                sse: SseRequest::s3_managed(),
                ..PutObjectArgs::default()
            },
        )
        .await
        .unwrap_or_else(|e| panic!("put failed: {e}"));

        let object = env
            .info(&bucket, "k", "")
            .await
            .unwrap_or_else(|e| panic!("info failed: {e}"));
        assert_eq!(object.sse_type, SseType::S3);
        assert!(!object.encryption_key.is_empty(), "sealed key must persist");
        assert_eq!(object.initialization_vector.len(), 16);

        // Bytes at rest differ from the plaintext.
        let mut raw = Vec::new();
        use oxgate_blob::BlobBackend;
        env.store
            .get(&object.pool, &object.object_id, 0, object.size as u64, &mut raw)
            .await
            .unwrap_or_else(|e| panic!("raw read failed: {e}"));
        assert_ne!(raw, body);

        // The read path decrypts transparently.
        let out = env
            .read_object(&object, 0, object.size, &SseRequest::none())
            .await
            .unwrap_or_else(|e| panic!("get failed: {e}"));
        assert_eq!(out, body);
    }

    #[tokio::test]
    async fn test_should_roundtrip_customer_key_encryption() {
        let env = TestEnv::new().await;
        let bucket = env.create_bucket("ssec").await;
        let body: Vec<u8> = (0..=255u8).collect();

        env.put_with(
            &bucket,
            "k",
            &body,
            PutObjectArgs {
                sse: SseRequest::customer(&CUSTOMER_KEY),
                ..PutObjectArgs::default()
            },
        )
        .await
        .unwrap_or_else(|e| panic!("put failed: {e}"));

        let object = env
            .info(&bucket, "k", "")
            .await
            .unwrap_or_else(|e| panic!("info failed: {e}"));
        assert_eq!(object.sse_type, SseType::Customer);
        assert!(
            object.encryption_key.is_empty(),
            "customer keys are never persisted"
        );

        let out = env
            .read_object(&object, 0, 256, &SseRequest::customer(&CUSTOMER_KEY))
            .await
            .unwrap_or_else(|e| panic!("get failed: {e}"));
        assert_eq!(out, body);
    }

    #[tokio::test]
    async fn test_should_serve_unaligned_range_of_encrypted_object() {
        let env = TestEnv::new().await;
        let bucket = env.create_bucket("sserange").await;
        let body: Vec<u8> = (0..=255u8).collect();
        env.put_with(
            &bucket,
            "k",
            &body,
            PutObjectArgs {
                sse: SseRequest::customer(&CUSTOMER_KEY),
                ..PutObjectArgs::default()
            },
        )
        .await
        .unwrap_or_else(|e| panic!("put failed: {e}"));

        let object = env
            .info(&bucket, "k", "")
            .await
            .unwrap_or_else(|e| panic!("info failed: {e}"));

        // Bytes 100..=199 of the object, an unaligned window.
        let out = env
            .read_object(&object, 100, 100, &SseRequest::customer(&CUSTOMER_KEY))
            .await
            .unwrap_or_else(|e| panic!("range failed: {e}"));
        assert_eq!(out, body[100..200].to_vec());

        // A few more unaligned windows.
        for (offset, length) in [(1i64, 1i64), (15, 2), (17, 31), (240, 16)] {
            let out = env
                .read_object(
                    &object,
                    offset,
                    length,
                    &SseRequest::customer(&CUSTOMER_KEY),
                )
                .await
                .unwrap_or_else(|e| panic!("range {offset}+{length} failed: {e}"));
            assert_eq!(out, body[offset as usize..(offset + length) as usize].to_vec());
        }
    }

    #[tokio::test]
    async fn test_should_reject_wrong_customer_key_material() {
        let env = TestEnv::new().await;
        let bucket = env.create_bucket("ssekey").await;
        env.put_with(
            &bucket,
            "k",
            b"secret",
            PutObjectArgs {
                sse: SseRequest::customer(&CUSTOMER_KEY),
                ..PutObjectArgs::default()
            },
        )
        .await
        .unwrap_or_else(|e| panic!("put failed: {e}"));

        let object = env
            .info(&bucket, "k", "")
            .await
            .unwrap_or_else(|e| panic!("info failed: {e}"));

        // A short key is rejected outright.
        let err = env
            .read_object(&object, 0, 6, &SseRequest::customer(&[1u8; 5]))
            .await;
        assert!(matches!(err, Err(GatewayError::AccessDenied)));
    }

    #[tokio::test]
    async fn test_should_reject_short_customer_key_on_put() {
        let env = TestEnv::new().await;
        let bucket = env.create_bucket("ssebad").await;
        let err = env
            .gateway
            .put_object(
                &bucket,
                "k",
                &alice(),
                PutObjectArgs {
                    size: 4,
                    sse: SseRequest::customer(&[1u8; 16]),
                    ..PutObjectArgs::default()
                },
                StreamPayload::from_bytes(Bytes::from_static(b"data")),
            )
            .await;
        assert!(matches!(err, Err(GatewayError::InvalidArgument { .. })));
    }

    #[tokio::test]
    async fn test_should_encrypt_multipart_uploads_end_to_end() {
        let env = TestEnv::new().await;
        let bucket = env.create_bucket("ssemp").await;

        let upload_id = env
            .gateway
            .new_multipart_upload(
                &bucket,
                "enc",
                &alice(),
                None,
                Default::default(),
                Default::default(),
                &SseRequest::s3_managed(),
            )
            .await
            .unwrap_or_else(|e| panic!("initiate failed: {e}"));

        let part1 = vec![b'P'; 131_072];
        let part2 = vec![b'Q'; 500];
        let mut etags = Vec::new();
        for (number, body) in [(1u32, &part1), (2u32, &part2)] {
            let etag = env
                .gateway
                .put_object_part(
                    &bucket,
                    "enc",
                    &upload_id,
                    number,
                    body.len() as i64,
                    &alice(),
                    None,
                    &SseRequest::none(),
                    StreamPayload::from_bytes(Bytes::copy_from_slice(body)),
                )
                .await
                .unwrap_or_else(|e| panic!("part {number} failed: {e}"));
            etags.push(etag);
        }

        env.gateway
            .complete_multipart_upload(
                &bucket,
                "enc",
                &upload_id,
                &[
                    CompletePart {
                        part_number: 1,
                        etag: etags[0].clone(),
                    },
                    CompletePart {
                        part_number: 2,
                        etag: etags[1].clone(),
                    },
                ],
                &alice(),
            )
            .await
            .unwrap_or_else(|e| panic!("complete failed: {e}"));

        let object = env
            .info(&bucket, "enc", "")
            .await
            .unwrap_or_else(|e| panic!("info failed: {e}"));
        assert_eq!(object.sse_type, SseType::S3);
        assert!(object.is_multipart());
        // Each part carries its own stream IV.
        for part in object.parts.values() {
            assert_eq!(part.initialization_vector.len(), 16);
        }

        let body = env
            .read_object(&object, 0, object.size, &SseRequest::none())
            .await
            .unwrap_or_else(|e| panic!("get failed: {e}"));
        assert_eq!(body.len(), part1.len() + part2.len());
        assert_eq!(&body[..part1.len()], part1.as_slice());
        assert_eq!(&body[part1.len()..], part2.as_slice());

        // A range crossing the encrypted part boundary.
        let crossing = env
            .read_object(&object, 131_070, 4, &SseRequest::none())
            .await
            .unwrap_or_else(|e| panic!("range failed: {e}"));
        assert_eq!(crossing, b"PPQQ");
    }

    #[tokio::test]
    async fn test_should_note_part_etag_is_plaintext_digest() {
        // Part ETags are digests of what the client sent, not of the
        // ciphertext at rest.
        let env = TestEnv::new().await;
        let bucket = env.create_bucket("ssetag").await;
        let upload_id = env
            .gateway
            .new_multipart_upload(
                &bucket,
                "k",
                &alice(),
                None,
                Default::default(),
                Default::default(),
                &SseRequest::s3_managed(),
            )
            .await
            .unwrap_or_else(|e| panic!("initiate failed: {e}"));

        let body = vec![b'Z'; 1000];
        let etag = env
            .gateway
            .put_object_part(
                &bucket,
                "k",
                &upload_id,
                1,
                1000,
                &alice(),
                None,
                &SseRequest::none(),
                StreamPayload::from_bytes(Bytes::copy_from_slice(&body)),
            )
            .await
            .unwrap_or_else(|e| panic!("part failed: {e}"));
        assert_eq!(etag, crate::md5_hex(&body));
    }
}
