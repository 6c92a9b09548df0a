use std::marker::PhantomData;

/// Zero-sized marker naming a type a publisher produces but never stores.
///
/// `fn() -> T` keeps the marker `Send + Sync` whatever `T` is, so sources
/// like `empty::<T>()` stay shareable across threads.
pub struct TypeHint<T>(PhantomData<fn() -> T>);

impl<T> TypeHint<T> {
  #[inline]
  pub fn new() -> Self { Self::default() }
}

impl<T> Default for TypeHint<T> {
  fn default() -> Self { TypeHint(PhantomData) }
}

impl<T> Clone for TypeHint<T> {
  #[inline]
  fn clone(&self) -> Self { *self }
}

impl<T> Copy for TypeHint<T> {}

impl<T> std::fmt::Debug for TypeHint<T> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "TypeHint<{}>", std::any::type_name::<T>())
  }
}
