//! Common Types Module
//!
//! 애플리케이션 전반에서 사용되는 공통 타입 정의
//!
//! - `Amount`: 6 decimals 고정소수점 금액 (ledger 단위)
//! - `EthAddress`: 검증된 EVM 주소
//! - `PageQuery` / `Pagination`: 히스토리 조회 페이지네이션

use std::fmt;
use std::iter::Sum;
use std::ops::{Add, Neg, Sub};
use std::str::FromStr;

use ethers::types::{Address, U256};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Ledger 금액 소수점 자리수 (레퍼런스 스테이블코인과 동일)
pub const AMOUNT_DECIMALS: u32 = 6;

/// 1.0 = 1_000_000 units
pub const AMOUNT_SCALE: i64 = 1_000_000;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AmountError {
    #[error("invalid amount format: {0}")]
    Format(String),

    #[error("amount has more than {AMOUNT_DECIMALS} decimal places")]
    Precision,

    #[error("amount out of range")]
    Overflow,
}

/// 금액 타입 (부호 있는 고정소수점, 6 decimals)
///
/// f64를 사용하지 않음: 모든 연산은 정수 단위로 수행
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Amount(i64);

impl Amount {
    pub const ZERO: Amount = Amount(0);

    /// 최소 단위(micro)로 생성
    pub const fn from_units(units: i64) -> Self {
        Self(units)
    }

    /// 정수 금액으로 생성 (예: `Amount::whole(100)` = 100.0)
    pub const fn whole(value: i64) -> Self {
        Self(value * AMOUNT_SCALE)
    }

    pub const fn units(self) -> i64 {
        self.0
    }

    pub fn is_positive(self) -> bool {
        self.0 > 0
    }

    pub fn is_negative(self) -> bool {
        self.0 < 0
    }

    pub fn abs(self) -> Self {
        Self(self.0.abs())
    }

    pub fn checked_add(self, other: Amount) -> Option<Amount> {
        self.0.checked_add(other.0).map(Amount)
    }

    pub fn checked_sub(self, other: Amount) -> Option<Amount> {
        self.0.checked_sub(other.0).map(Amount)
    }

    pub fn saturating_add(self, other: Amount) -> Amount {
        Amount(self.0.saturating_add(other.0))
    }

    /// self + delta > limit. 합이 i64 범위를 넘으면 초과로 판정
    pub fn would_exceed(self, delta: Amount, limit: Amount) -> bool {
        self.checked_add(delta).map_or(true, |total| total > limit)
    }

    /// 0 미만이면 0
    pub fn clamp_non_negative(self) -> Self {
        Self(self.0.max(0))
    }

    /// 온체인 토큰 단위로 변환
    ///
    /// token_decimals >= 6: 10^(d-6) 배
    /// token_decimals < 6: 나누어 떨어지지 않으면 에러
    pub fn to_token_units(self, token_decimals: u32) -> Result<U256, AmountError> {
        if self.0 < 0 {
            return Err(AmountError::Overflow);
        }
        let units = U256::from(self.0 as u64);
        if token_decimals >= AMOUNT_DECIMALS {
            let factor = U256::exp10((token_decimals - AMOUNT_DECIMALS) as usize);
            units.checked_mul(factor).ok_or(AmountError::Overflow)
        } else {
            let factor = U256::exp10((AMOUNT_DECIMALS - token_decimals) as usize);
            if !(units % factor).is_zero() {
                return Err(AmountError::Precision);
            }
            Ok(units / factor)
        }
    }

    /// 온체인 토큰 단위에서 변환 (6 decimals 아래 잔여분이 있으면 에러)
    pub fn from_token_units(value: U256, token_decimals: u32) -> Result<Self, AmountError> {
        let units = if token_decimals >= AMOUNT_DECIMALS {
            let factor = U256::exp10((token_decimals - AMOUNT_DECIMALS) as usize);
            if !(value % factor).is_zero() {
                return Err(AmountError::Precision);
            }
            value / factor
        } else {
            let factor = U256::exp10((AMOUNT_DECIMALS - token_decimals) as usize);
            value.checked_mul(factor).ok_or(AmountError::Overflow)?
        };
        if units > U256::from(i64::MAX as u64) {
            return Err(AmountError::Overflow);
        }
        Ok(Self(units.as_u64() as i64))
    }
}

impl Add for Amount {
    type Output = Amount;

    fn add(self, rhs: Amount) -> Amount {
        Amount(self.0 + rhs.0)
    }
}

impl Sub for Amount {
    type Output = Amount;

    fn sub(self, rhs: Amount) -> Amount {
        Amount(self.0 - rhs.0)
    }
}

impl Neg for Amount {
    type Output = Amount;

    fn neg(self) -> Amount {
        Amount(-self.0)
    }
}

impl Sum for Amount {
    fn sum<I: Iterator<Item = Amount>>(iter: I) -> Self {
        iter.fold(Amount::ZERO, |acc, a| acc + a)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        let whole = abs / AMOUNT_SCALE as u64;
        let frac = abs % AMOUNT_SCALE as u64;
        if frac == 0 {
            write!(f, "{}{}", sign, whole)
        } else {
            let frac = format!("{:06}", frac);
            write!(f, "{}{}.{}", sign, whole, frac.trim_end_matches('0'))
        }
    }
}

impl FromStr for Amount {
    type Err = AmountError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (negative, body) = match s.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, s),
        };
        if body.is_empty() {
            return Err(AmountError::Format(s.to_string()));
        }

        let (whole, frac) = match body.split_once('.') {
            Some((w, f)) => (w, f),
            None => (body, ""),
        };
        let digits_ok = |part: &str| part.chars().all(|c| c.is_ascii_digit());
        if whole.is_empty() && frac.is_empty() || !digits_ok(whole) || !digits_ok(frac) {
            return Err(AmountError::Format(s.to_string()));
        }
        if frac.len() > AMOUNT_DECIMALS as usize {
            return Err(AmountError::Precision);
        }

        let whole: i64 = if whole.is_empty() {
            0
        } else {
            whole.parse().map_err(|_| AmountError::Overflow)?
        };
        let frac_units: i64 = if frac.is_empty() {
            0
        } else {
            format!("{:0<6}", frac).parse().map_err(|_| AmountError::Format(s.to_string()))?
        };

        let units = whole
            .checked_mul(AMOUNT_SCALE)
            .and_then(|w| w.checked_add(frac_units))
            .ok_or(AmountError::Overflow)?;
        Ok(Amount(if negative { -units } else { units }))
    }
}

/// JSON에서는 문자열("30.5") 또는 숫자(30.5) 모두 허용, 출력은 항상 문자열
impl Serialize for Amount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Str(String),
            Num(serde_json::Number),
        }

        let raw = Raw::deserialize(deserializer)?;
        let text = match raw {
            Raw::Str(s) => s,
            Raw::Num(n) => n.to_string(),
        };
        text.parse().map_err(serde::de::Error::custom)
    }
}

/// Ethereum 주소 타입
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EthAddress(String);

impl EthAddress {
    pub fn new(addr: &str) -> Result<Self, String> {
        let addr = addr.trim().to_lowercase();
        if addr.starts_with("0x")
            && addr.len() == 42
            && addr[2..].chars().all(|c| c.is_ascii_hexdigit())
        {
            Ok(Self(addr))
        } else {
            Err("Invalid Ethereum address format".to_string())
        }
    }

    pub fn from_h160(addr: Address) -> Self {
        Self(format!("{:#x}", addr))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn to_h160(&self) -> Address {
        // new()에서 형식 검증을 마쳤으므로 실패하지 않음
        self.0.parse().unwrap_or_default()
    }

    /// 0x000...000 (소각 주소)
    pub fn is_zero(&self) -> bool {
        self.0[2..].chars().all(|c| c == '0')
    }
}

impl fmt::Display for EthAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// 페이지네이션 쿼리 파라미터
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct PageQuery {
    /// 페이지 크기 (기본 20, 최대 100)
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

impl PageQuery {
    pub const DEFAULT_LIMIT: u32 = 20;
    pub const MAX_LIMIT: u32 = 100;

    pub fn limit(&self) -> i64 {
        self.limit.unwrap_or(Self::DEFAULT_LIMIT).clamp(1, Self::MAX_LIMIT) as i64
    }

    pub fn offset(&self) -> i64 {
        self.offset.unwrap_or(0) as i64
    }

    pub fn paginate(&self, total: i64) -> Pagination {
        let limit = self.limit();
        let offset = self.offset();
        Pagination {
            limit,
            offset,
            total,
            has_next: offset + limit < total,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Pagination {
    pub limit: i64,
    pub offset: i64,
    pub total: i64,
    pub has_next: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_eth_address_valid() {
        let addr = EthAddress::new("0x1234567890123456789012345678901234567890");
        assert!(addr.is_ok());
    }

    #[test]
    fn test_eth_address_invalid() {
        assert!(EthAddress::new("invalid").is_err());
        assert!(EthAddress::new("0x12345678901234567890123456789012345678zz").is_err());
    }

    #[test]
    fn test_amount_parse_and_display() {
        assert_eq!("30".parse::<Amount>().unwrap(), Amount::whole(30));
        assert_eq!("30.5".parse::<Amount>().unwrap(), Amount::from_units(30_500_000));
        assert_eq!("0.000001".parse::<Amount>().unwrap(), Amount::from_units(1));
        assert_eq!("-2.25".parse::<Amount>().unwrap(), Amount::from_units(-2_250_000));

        assert_eq!(Amount::from_units(30_500_000).to_string(), "30.5");
        assert_eq!(Amount::whole(70).to_string(), "70");
        assert_eq!(Amount::from_units(-1).to_string(), "-0.000001");
    }

    #[test]
    fn test_amount_parse_rejects_garbage() {
        assert_eq!("1.0000001".parse::<Amount>(), Err(AmountError::Precision));
        assert!("abc".parse::<Amount>().is_err());
        assert!("".parse::<Amount>().is_err());
        assert!(".".parse::<Amount>().is_err());
        assert!("1e5".parse::<Amount>().is_err());
    }

    #[test]
    fn test_amount_json_accepts_number_and_string() {
        let a: Amount = serde_json::from_str("30").unwrap();
        let b: Amount = serde_json::from_str("\"30\"").unwrap();
        let c: Amount = serde_json::from_str("12.75").unwrap();
        assert_eq!(a, b);
        assert_eq!(c, Amount::from_units(12_750_000));
        assert_eq!(serde_json::to_string(&c).unwrap(), "\"12.75\"");
    }

    #[test]
    fn test_token_unit_conversion() {
        let amount = Amount::whole(50);

        // USDT (6 decimals): 그대로
        assert_eq!(amount.to_token_units(6).unwrap(), U256::from(50_000_000u64));

        // 18 decimals 토큰
        let wei = amount.to_token_units(18).unwrap();
        assert_eq!(wei, U256::from(50u64) * U256::exp10(18));
        assert_eq!(Amount::from_token_units(wei, 18).unwrap(), amount);

        // 18 decimals 에서 6자리 이하 잔여분은 거부
        let dust = U256::exp10(18) + U256::from(1u64);
        assert_eq!(Amount::from_token_units(dust, 18), Err(AmountError::Precision));
    }

    #[test]
    fn test_would_exceed_treats_overflow_as_over() {
        let max = Amount::from_units(i64::MAX);
        assert!(Amount::whole(30).would_exceed(Amount::whole(11), Amount::whole(40)));
        assert!(!Amount::whole(30).would_exceed(Amount::whole(10), Amount::whole(40)));
        assert!(Amount::from_units(i64::MAX - 5).would_exceed(Amount::from_units(6), max));
        assert!(!Amount::from_units(i64::MAX - 5).would_exceed(Amount::from_units(5), max));
        assert_eq!(Amount::from_units(i64::MAX - 5).saturating_add(Amount::whole(1)), max);
    }

    #[test]
    fn test_pagination() {
        let q = PageQuery { limit: Some(500), offset: Some(10) };
        assert_eq!(q.limit(), 100);

        let page = PageQuery { limit: Some(20), offset: Some(0) }.paginate(45);
        assert!(page.has_next);
        let last = PageQuery { limit: Some(20), offset: Some(40) }.paginate(45);
        assert!(!last.has_next);
    }
}
