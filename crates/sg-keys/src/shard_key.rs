use std::str::FromStr;

use sg_types::KeyError;

use crate::codec::{finish, read_header, write_header};
use crate::component::KeyComponent;
use crate::external;

/// Origin reserved for the empty sentinel key.
pub const EMPTY_ORIGIN: char = '0';

/// Anything located on a shard.
pub trait ShardKeyed {
    type Shard;

    fn shard_id(&self) -> &Self::Shard;
}

/// A record identified by one of the shard key types.
pub trait KeyedModel {
    type Key: ShardKeyed + PartialEq;

    fn key(&self) -> &Self::Key;
}

fn check_origin(actual: char, expected: char) -> Result<(), KeyError> {
    if actual == expected {
        Ok(())
    } else {
        Err(KeyError::OriginMismatch { expected, actual })
    }
}

// ---------------------------------------------------------------------------
// ShardKey
// ---------------------------------------------------------------------------

/// Origin tag, shard id and record id.
///
/// Binary form: `[header][origin][shard][record]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ShardKey<S, R> {
    origin: char,
    shard_id: S,
    record_id: R,
}

impl<S: KeyComponent, R: KeyComponent> ShardKey<S, R> {
    /// # Panics
    /// When `origin` is [`EMPTY_ORIGIN`] but either id is non-default.
    pub fn new(origin: char, shard_id: S, record_id: R) -> Self {
        match Self::try_new(origin, shard_id, record_id) {
            Ok(key) => key,
            Err(e) => panic!("invalid shard key: {e}"),
        }
    }

    pub fn try_new(origin: char, shard_id: S, record_id: R) -> Result<Self, KeyError> {
        if origin == EMPTY_ORIGIN && !(shard_id.is_default() && record_id.is_default()) {
            return Err(KeyError::InvalidEmptyKey);
        }
        Ok(ShardKey { origin, shard_id, record_id })
    }

    pub fn empty() -> Self {
        ShardKey { origin: EMPTY_ORIGIN, shard_id: S::default(), record_id: R::default() }
    }

    pub fn is_empty(&self) -> bool {
        self.shard_id.is_default() && self.record_id.is_default()
    }

    pub fn origin(&self) -> char {
        self.origin
    }

    pub fn shard_id(&self) -> &S {
        &self.shard_id
    }

    pub fn record_id(&self) -> &R {
        &self.record_id
    }

    pub fn ensure_origin(&self, expected: char) -> Result<(), KeyError> {
        check_origin(self.origin, expected)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, KeyError> {
        let mut out = Vec::with_capacity(24);
        write_header(self.origin, &mut out);
        self.write_ids(&mut out)?;
        Ok(out)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, KeyError> {
        let mut input = bytes;
        let origin = read_header(&mut input)?;
        let key = Self::read_ids(origin, &mut input)?;
        finish(input)?;
        Ok(key)
    }

    pub fn to_external_string(&self) -> Result<String, KeyError> {
        Ok(external::encode(self.to_bytes()?))
    }

    pub fn from_external_string(token: &str) -> Result<Self, KeyError> {
        Self::from_bytes(&external::decode(token)?)
    }

    fn write_ids(&self, out: &mut Vec<u8>) -> Result<(), KeyError> {
        self.shard_id.encode_into(out)?;
        self.record_id.encode_into(out)
    }

    fn read_ids(origin: char, input: &mut &[u8]) -> Result<Self, KeyError> {
        let shard_id = S::decode_from(input)?;
        let record_id = R::decode_from(input)?;
        Self::try_new(origin, shard_id, record_id)
    }
}

impl<S: KeyComponent, R: KeyComponent> Default for ShardKey<S, R> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<S: KeyComponent, R: KeyComponent> FromStr for ShardKey<S, R> {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_external_string(s)
    }
}

impl<S, R> ShardKeyed for ShardKey<S, R> {
    type Shard = S;

    fn shard_id(&self) -> &S {
        &self.shard_id
    }
}

impl<S: PartialEq, R: PartialEq> KeyedModel for ShardKey<S, R> {
    type Key = Self;

    fn key(&self) -> &Self {
        self
    }
}

// ---------------------------------------------------------------------------
// ShardChild
// ---------------------------------------------------------------------------

/// A [`ShardKey`] extended with a child id; binary form appends the child.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ShardChild<S, R, C> {
    key: ShardKey<S, R>,
    child_id: C,
}

impl<S: KeyComponent, R: KeyComponent, C: KeyComponent> ShardChild<S, R, C> {
    /// # Panics
    /// When `origin` is [`EMPTY_ORIGIN`] but any id is non-default.
    pub fn new(origin: char, shard_id: S, record_id: R, child_id: C) -> Self {
        match Self::try_new(origin, shard_id, record_id, child_id) {
            Ok(key) => key,
            Err(e) => panic!("invalid shard child key: {e}"),
        }
    }

    pub fn try_new(origin: char, shard_id: S, record_id: R, child_id: C) -> Result<Self, KeyError> {
        Self::from_parent(ShardKey::try_new(origin, shard_id, record_id)?, child_id)
    }

    pub fn from_parent(key: ShardKey<S, R>, child_id: C) -> Result<Self, KeyError> {
        if key.origin == EMPTY_ORIGIN && !child_id.is_default() {
            return Err(KeyError::InvalidEmptyKey);
        }
        Ok(ShardChild { key, child_id })
    }

    pub fn empty() -> Self {
        ShardChild { key: ShardKey::empty(), child_id: C::default() }
    }

    pub fn is_empty(&self) -> bool {
        self.key.is_empty() && self.child_id.is_default()
    }

    pub fn parent(&self) -> &ShardKey<S, R> {
        &self.key
    }

    pub fn origin(&self) -> char {
        self.key.origin
    }

    pub fn shard_id(&self) -> &S {
        &self.key.shard_id
    }

    pub fn record_id(&self) -> &R {
        &self.key.record_id
    }

    pub fn child_id(&self) -> &C {
        &self.child_id
    }

    pub fn ensure_origin(&self, expected: char) -> Result<(), KeyError> {
        check_origin(self.key.origin, expected)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, KeyError> {
        let mut out = Vec::with_capacity(32);
        write_header(self.key.origin, &mut out);
        self.write_ids(&mut out)?;
        Ok(out)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, KeyError> {
        let mut input = bytes;
        let origin = read_header(&mut input)?;
        let key = Self::read_ids(origin, &mut input)?;
        finish(input)?;
        Ok(key)
    }

    pub fn to_external_string(&self) -> Result<String, KeyError> {
        Ok(external::encode(self.to_bytes()?))
    }

    pub fn from_external_string(token: &str) -> Result<Self, KeyError> {
        Self::from_bytes(&external::decode(token)?)
    }

    fn write_ids(&self, out: &mut Vec<u8>) -> Result<(), KeyError> {
        self.key.write_ids(out)?;
        self.child_id.encode_into(out)
    }

    fn read_ids(origin: char, input: &mut &[u8]) -> Result<Self, KeyError> {
        let key = ShardKey::read_ids(origin, input)?;
        let child_id = C::decode_from(input)?;
        Self::from_parent(key, child_id)
    }
}

impl<S: KeyComponent, R: KeyComponent, C: KeyComponent> Default for ShardChild<S, R, C> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<S: KeyComponent, R: KeyComponent, C: KeyComponent> FromStr for ShardChild<S, R, C> {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_external_string(s)
    }
}

impl<S, R, C> ShardKeyed for ShardChild<S, R, C> {
    type Shard = S;

    fn shard_id(&self) -> &S {
        &self.key.shard_id
    }
}

impl<S: PartialEq, R: PartialEq, C: PartialEq> KeyedModel for ShardChild<S, R, C> {
    type Key = Self;

    fn key(&self) -> &Self {
        self
    }
}

// ---------------------------------------------------------------------------
// ShardGrandchild
// ---------------------------------------------------------------------------

/// A [`ShardChild`] extended with a grandchild id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ShardGrandchild<S, R, C, G> {
    child: ShardChild<S, R, C>,
    grandchild_id: G,
}

impl<S, R, C, G> ShardGrandchild<S, R, C, G>
where
    S: KeyComponent,
    R: KeyComponent,
    C: KeyComponent,
    G: KeyComponent,
{
    /// # Panics
    /// When `origin` is [`EMPTY_ORIGIN`] but any id is non-default.
    pub fn new(origin: char, shard_id: S, record_id: R, child_id: C, grandchild_id: G) -> Self {
        match Self::try_new(origin, shard_id, record_id, child_id, grandchild_id) {
            Ok(key) => key,
            Err(e) => panic!("invalid shard grandchild key: {e}"),
        }
    }

    pub fn try_new(
        origin: char,
        shard_id: S,
        record_id: R,
        child_id: C,
        grandchild_id: G,
    ) -> Result<Self, KeyError> {
        Self::from_child(ShardChild::try_new(origin, shard_id, record_id, child_id)?, grandchild_id)
    }

    pub fn from_child(child: ShardChild<S, R, C>, grandchild_id: G) -> Result<Self, KeyError> {
        if child.origin() == EMPTY_ORIGIN && !grandchild_id.is_default() {
            return Err(KeyError::InvalidEmptyKey);
        }
        Ok(ShardGrandchild { child, grandchild_id })
    }

    pub fn empty() -> Self {
        ShardGrandchild { child: ShardChild::empty(), grandchild_id: G::default() }
    }

    pub fn is_empty(&self) -> bool {
        self.child.is_empty() && self.grandchild_id.is_default()
    }

    pub fn child(&self) -> &ShardChild<S, R, C> {
        &self.child
    }

    pub fn parent(&self) -> &ShardKey<S, R> {
        self.child.parent()
    }

    pub fn origin(&self) -> char {
        self.child.origin()
    }

    pub fn shard_id(&self) -> &S {
        self.child.shard_id()
    }

    pub fn record_id(&self) -> &R {
        self.child.record_id()
    }

    pub fn child_id(&self) -> &C {
        self.child.child_id()
    }

    pub fn grandchild_id(&self) -> &G {
        &self.grandchild_id
    }

    pub fn ensure_origin(&self, expected: char) -> Result<(), KeyError> {
        check_origin(self.origin(), expected)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, KeyError> {
        let mut out = Vec::with_capacity(40);
        write_header(self.origin(), &mut out);
        self.child.write_ids(&mut out)?;
        self.grandchild_id.encode_into(&mut out)?;
        Ok(out)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, KeyError> {
        let mut input = bytes;
        let origin = read_header(&mut input)?;
        let child = ShardChild::read_ids(origin, &mut input)?;
        let grandchild_id = G::decode_from(&mut input)?;
        finish(input)?;
        Self::from_child(child, grandchild_id)
    }

    pub fn to_external_string(&self) -> Result<String, KeyError> {
        Ok(external::encode(self.to_bytes()?))
    }

    pub fn from_external_string(token: &str) -> Result<Self, KeyError> {
        Self::from_bytes(&external::decode(token)?)
    }
}

impl<S, R, C, G> Default for ShardGrandchild<S, R, C, G>
where
    S: KeyComponent,
    R: KeyComponent,
    C: KeyComponent,
    G: KeyComponent,
{
    fn default() -> Self {
        Self::empty()
    }
}

impl<S, R, C, G> FromStr for ShardGrandchild<S, R, C, G>
where
    S: KeyComponent,
    R: KeyComponent,
    C: KeyComponent,
    G: KeyComponent,
{
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_external_string(s)
    }
}

impl<S, R, C, G> ShardKeyed for ShardGrandchild<S, R, C, G> {
    type Shard = S;

    fn shard_id(&self) -> &S {
        &self.child.key.shard_id
    }
}

impl<S: PartialEq, R: PartialEq, C: PartialEq, G: PartialEq> KeyedModel
    for ShardGrandchild<S, R, C, G>
{
    type Key = Self;

    fn key(&self) -> &Self {
        self
    }
}
