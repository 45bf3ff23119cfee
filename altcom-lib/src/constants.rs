// Protocol constants for the ALTCOM command gateway

/// Bit set on a command id to form the id of its response
pub const RESPONSE_FLAG: u16 = 0x1000;

/// LTE result code for a successful remote operation
pub const LTE_RESULT_OK: u8 = 0;

/// LTE result code for a failed remote operation
pub const LTE_RESULT_ERROR: u8 = 1;

/// Largest timer value a PSM timer field may carry
pub const PSM_TIMEVAL_MAX: u8 = 31;

/// Size of the digest output block in an MdDigest response (64 bytes)
pub const MD_DIGEST_OUTPUT_LEN: usize = 64;

/// Command ids of protocol version 1
pub mod v1 {
    pub const GET_DYNAMIC_PSM: u16 = 0x0035;
    pub const TLS_MD_DIGEST: u16 = 0x0185;
    pub const TLS_X509WRITE_CRT_SERIAL: u16 = 0x01A6;
}

/// Command ids of protocol version 4
pub mod v4 {
    pub const GET_DYNAMIC_PSM: u16 = 0x0235;
    pub const GET_PSM: u16 = 0x0236;
    pub const TLS_MD_DIGEST: u16 = 0x0385;
}

/// Positive errno values used to build negative local result codes
pub mod errno {
    pub const EPERM: i32 = 1;
    pub const ENOMEM: i32 = 12;
    pub const EFAULT: i32 = 14;
    pub const EINVAL: i32 = 22;
    pub const ENOSYS: i32 = 38;
    pub const EPROTO: i32 = 71;
    pub const ENETDOWN: i32 = 100;
    pub const ETIMEDOUT: i32 = 110;
    pub const EALREADY: i32 = 114;
}
