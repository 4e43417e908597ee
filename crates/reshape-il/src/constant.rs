use std::collections::HashMap;

use crate::{Id, IdentifierMap};

/// The value of a program constant.
///
/// Floating point values are stored as their bit pattern so constants can be hashed and compared.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ConstantValue {
    Bool(bool),
    Int(u64),
    Fp(u64),
    Null,
    Undef,
    /// A composite or backend-specific constant passed through opaquely.
    Unexposed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Constant {
    pub id: Id,
    pub ty: Id,
    pub value: ConstantValue,
}

/// Ordered constant pool, deduplicated by `(type, value)`.
#[derive(Debug, Clone, Default)]
pub struct ConstantMap {
    constants: Vec<Constant>,
    by_id: HashMap<Id, usize>,
    lookup: HashMap<(Id, ConstantValue), Id>,
    original_count: usize,
}

impl ConstantMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn find_or_add(&mut self, ty: Id, value: ConstantValue, ids: &mut IdentifierMap) -> Id {
        if value != ConstantValue::Unexposed {
            if let Some(&id) = self.lookup.get(&(ty, value)) {
                return id;
            }
        }
        let id = ids.alloc();
        self.add_with_id(id, ty, value);
        id
    }

    pub fn add_with_id(&mut self, id: Id, ty: Id, value: ConstantValue) {
        if value != ConstantValue::Unexposed {
            self.lookup.entry((ty, value)).or_insert(id);
        }
        self.by_id.insert(id, self.constants.len());
        self.constants.push(Constant { id, ty, value });
    }

    pub fn get(&self, id: Id) -> Option<&Constant> {
        self.by_id.get(&id).map(|&index| &self.constants[index])
    }

    pub fn find(&self, ty: Id, value: ConstantValue) -> Option<Id> {
        self.lookup.get(&(ty, value)).copied()
    }

    pub fn contains(&self, id: Id) -> bool {
        self.by_id.contains_key(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Constant> + '_ {
        self.constants.iter()
    }

    pub fn len(&self) -> usize {
        self.constants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.constants.is_empty()
    }

    pub fn seal_original(&mut self) {
        self.original_count = self.constants.len();
    }

    pub fn is_original(&self, id: Id) -> bool {
        self.by_id
            .get(&id)
            .is_some_and(|&index| index < self.original_count)
    }

    pub fn added(&self) -> impl Iterator<Item = &Constant> + '_ {
        self.constants[self.original_count..].iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constants_deduplicate_by_type_and_value() {
        let mut ids = IdentifierMap::with_bound(10);
        let mut constants = ConstantMap::new();
        let u32_ty = Id(1);
        let i32_ty = Id(2);

        let a = constants.find_or_add(u32_ty, ConstantValue::Int(7), &mut ids);
        let b = constants.find_or_add(u32_ty, ConstantValue::Int(7), &mut ids);
        let c = constants.find_or_add(i32_ty, ConstantValue::Int(7), &mut ids);

        assert_eq!(a, b);
        assert_ne!(a, c, "same value with a different type is a different constant");
        assert_eq!(constants.get(a).map(|c| c.value), Some(ConstantValue::Int(7)));
    }

    #[test]
    fn unexposed_constants_are_never_merged() {
        let mut ids = IdentifierMap::new();
        let mut constants = ConstantMap::new();
        let a = constants.find_or_add(Id(1), ConstantValue::Unexposed, &mut ids);
        let b = constants.find_or_add(Id(1), ConstantValue::Unexposed, &mut ids);
        assert_ne!(a, b);
    }
}
