//! `private-*` channels: membership is open to any socket that can
//! produce a valid HMAC signature over `socket_id:channel`, nothing
//! else to track beyond that one check.

use super::verify_private_auth;

pub struct SubscribeRequest<'a> {
    pub socket_id: &'a str,
    pub channel: &'a str,
    pub signature: &'a str,
}

/// Returns `Ok(())` if the signature checks out, `Err(())` otherwise.
/// Per the protocol's documented behavior, a failed auth check is
/// silently dropped rather than answered with a `pusher:error` frame —
/// the caller should just not send `subscription_succeeded`.
pub fn authorize(secret: &str, req: &SubscribeRequest) -> Result<(), ()> {
    if verify_private_auth(secret, req.socket_id, req.channel, req.signature) {
        Ok(())
    } else {
        Err(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use subhub_common::auth as hmac_auth;

    #[test]
    fn valid_signature_authorizes() {
        let signature = hmac_auth::sign("secret", "sock-1:private-room");
        let req = SubscribeRequest {
            socket_id: "sock-1",
            channel: "private-room",
            signature: &signature,
        };
        assert!(authorize("secret", &req).is_ok());
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let signature = hmac_auth::sign("secret", "sock-1:private-room");
        let req = SubscribeRequest {
            socket_id: "sock-1",
            channel: "private-room",
            signature: &signature,
        };
        assert!(authorize("other-secret", &req).is_err());
    }

    #[test]
    fn signature_for_different_channel_is_rejected() {
        let signature = hmac_auth::sign("secret", "sock-1:private-other");
        let req = SubscribeRequest {
            socket_id: "sock-1",
            channel: "private-room",
            signature: &signature,
        };
        assert!(authorize("secret", &req).is_err());
    }
}
