//! Secret-shared building blocks, from Beaver multiplication up to the private join.

pub mod batch;
pub mod bitwise;
pub mod compare;
pub mod divide;
pub mod join;
pub mod lookup;
pub mod matrix_multiply;
pub mod modconv;
pub mod multiply;
pub mod prefix_or;
pub mod reveal;
pub mod sort;
pub mod square_matrix;
pub mod typecast;
pub mod zip;
