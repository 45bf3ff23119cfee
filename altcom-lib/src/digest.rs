//! Message digest computed by the modem's TLS stack over a certificate chain.

use crate::client::Altcom;
use crate::codec::{Command, parse_exact};
use crate::command::LogicalCommand;
use crate::constants::MD_DIGEST_OUTPUT_LEN;
use crate::error::AltcomError;
use crate::gateway::CommandGateway;
use num_enum::{IntoPrimitive, TryFromPrimitive};
use strum_macros::Display;
use tracing::debug;
use zerocopy::byteorder::big_endian::{I32, U32};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

/// Digest algorithm identifiers understood by the modem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, TryFromPrimitive, IntoPrimitive)]
#[repr(u32)]
pub enum MdType {
    None = 0,
    #[strum(to_string = "MD2")]
    Md2 = 1,
    #[strum(to_string = "MD4")]
    Md4 = 2,
    #[strum(to_string = "MD5")]
    Md5 = 3,
    #[strum(to_string = "SHA-1")]
    Sha1 = 4,
    #[strum(to_string = "SHA-224")]
    Sha224 = 5,
    #[strum(to_string = "SHA-256")]
    Sha256 = 6,
    #[strum(to_string = "SHA-384")]
    Sha384 = 7,
    #[strum(to_string = "SHA-512")]
    Sha512 = 8,
    #[strum(to_string = "RIPEMD-160")]
    Ripemd160 = 9,
}

impl MdType {
    /// Size of the digest this algorithm produces, in bytes
    pub fn digest_len(self) -> usize {
        match self {
            MdType::None => 0,
            MdType::Md2 | MdType::Md4 | MdType::Md5 => 16,
            MdType::Sha1 | MdType::Ripemd160 => 20,
            MdType::Sha224 => 28,
            MdType::Sha256 => 32,
            MdType::Sha384 => 48,
            MdType::Sha512 => 64,
        }
    }
}

/// MdDigest request (8 bytes)
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
pub struct MdDigestRequestRaw {
    pub md_type: U32,
    pub chain_id: U32,
}

/// MdDigest response (68 bytes)
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
pub struct MdDigestResponseRaw {
    pub ret_code: I32,
    pub output: [u8; MD_DIGEST_OUTPUT_LEN],
}

impl MdDigestResponseRaw {
    /// Successful response carrying `digest` at the start of the output block.
    pub fn ok(digest: &[u8]) -> Self {
        let mut output = [0u8; MD_DIGEST_OUTPUT_LEN];
        let len = digest.len().min(MD_DIGEST_OUTPUT_LEN);
        output[..len].copy_from_slice(&digest[..len]);
        Self {
            ret_code: I32::new(0),
            output,
        }
    }

    pub fn error(code: i32) -> Self {
        Self {
            ret_code: I32::new(code),
            output: [0u8; MD_DIGEST_OUTPUT_LEN],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MdDigestCommand {
    pub md: MdType,
    pub chain_id: u32,
}

impl MdDigestCommand {
    /// Parse the request payload as the modem sees it.
    pub fn parse_request(bytes: &[u8]) -> Result<Self, AltcomError> {
        let raw = parse_exact::<MdDigestRequestRaw>(bytes)?;
        let md = MdType::try_from(raw.md_type.get())
            .map_err(|_| AltcomError::Validation(format!("unknown digest type {}", raw.md_type.get())))?;
        Ok(Self {
            md,
            chain_id: raw.chain_id.get(),
        })
    }
}

impl Command for MdDigestCommand {
    const LOGICAL: LogicalCommand = LogicalCommand::MdDigest;
    const REQUEST_LEN: usize = size_of::<MdDigestRequestRaw>();
    const RESPONSE_LEN: usize = size_of::<MdDigestResponseRaw>();

    type Output = [u8; MD_DIGEST_OUTPUT_LEN];

    fn encode(&self, out: &mut [u8]) {
        let raw = MdDigestRequestRaw {
            md_type: U32::new(self.md.into()),
            chain_id: U32::new(self.chain_id),
        };
        out.copy_from_slice(raw.as_bytes());
    }

    fn decode(response: &[u8]) -> Result<Self::Output, AltcomError> {
        let raw = parse_exact::<MdDigestResponseRaw>(response)?;
        let ret = raw.ret_code.get();
        debug!(ret, "md_digest response");
        if ret != 0 {
            return Err(AltcomError::Remote(ret));
        }
        Ok(raw.output)
    }
}

/// Digest bytes returned by the modem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Digest {
    md: MdType,
    bytes: Vec<u8>,
}

impl Digest {
    pub fn md(&self) -> MdType {
        self.md
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.bytes)
    }
}

impl<G: CommandGateway> Altcom<G> {
    /// Compute the `md` digest of the certificate chain `chain_id` on the modem.
    pub async fn md_digest(&self, md: MdType, chain_id: u32) -> Result<Digest, AltcomError> {
        if md == MdType::None {
            return Err(AltcomError::InvalidArgument("digest type required"));
        }
        debug!(%md, chain_id, "md_digest request");
        let output = self.request(&MdDigestCommand { md, chain_id }).await?;
        Ok(Digest {
            md,
            bytes: output[..md.digest_len()].to_vec(),
        })
    }
}
