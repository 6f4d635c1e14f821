// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Arithmetic in GF(2^8) with the Rijndael polynomial x^8 + x^4 + x^3 + x + 1.
//!
//! Multiplication is branchless so share values never steer control flow.

use std::ops::{Add, Div, Mul, Sub};

use zeroize::Zeroize;

/// An element of GF(2^8).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Gf256(pub u8);

impl Gf256 {
	pub const ZERO: Gf256 = Gf256(0);
	pub const ONE: Gf256 = Gf256(1);

	/// Multiplicative inverse, computed as a^254. Zero maps to zero.
	pub fn invert(self) -> Gf256 {
		let mut result = Gf256::ONE;
		let mut base = self;
		let mut exp = 254u8;
		for _ in 0..8 {
			// Square-and-multiply over a public exponent.
			if exp & 1 == 1 {
				result = result * base;
			}
			base = base * base;
			exp >>= 1;
		}
		result
	}
}

impl Zeroize for Gf256 {
	fn zeroize(&mut self) {
		self.0.zeroize();
	}
}

impl Add for Gf256 {
	type Output = Gf256;

	#[allow(clippy::suspicious_arithmetic_impl)]
	fn add(self, rhs: Gf256) -> Gf256 {
		Gf256(self.0 ^ rhs.0)
	}
}

impl Sub for Gf256 {
	type Output = Gf256;

	#[allow(clippy::suspicious_arithmetic_impl)]
	fn sub(self, rhs: Gf256) -> Gf256 {
		Gf256(self.0 ^ rhs.0)
	}
}

impl Mul for Gf256 {
	type Output = Gf256;

	fn mul(self, rhs: Gf256) -> Gf256 {
		let mut a = self.0;
		let mut b = rhs.0;
		let mut product = 0u8;
		for _ in 0..8 {
			product ^= a & 0u8.wrapping_sub(b & 1);
			let carry = 0u8.wrapping_sub(a >> 7);
			a = (a << 1) ^ (0x1b & carry);
			b >>= 1;
		}
		Gf256(product)
	}
}

impl Div for Gf256 {
	type Output = Gf256;

	#[allow(clippy::suspicious_arithmetic_impl)]
	fn div(self, rhs: Gf256) -> Gf256 {
		self * rhs.invert()
	}
}

/// Evaluate the polynomial with `coefficients` (constant term first) at `x`.
pub fn evaluate(coefficients: &[Gf256], x: Gf256) -> Gf256 {
	coefficients
		.iter()
		.rev()
		.fold(Gf256::ZERO, |acc, &c| acc * x + c)
}

/// Lagrange interpolation of the points at x = 0.
///
/// Callers guarantee the x coordinates are distinct and non-zero.
pub fn interpolate_at_zero(points: &[(Gf256, Gf256)]) -> Gf256 {
	let mut result = Gf256::ZERO;
	for (i, &(xi, yi)) in points.iter().enumerate() {
		let mut numerator = Gf256::ONE;
		let mut denominator = Gf256::ONE;
		for (j, &(xj, _)) in points.iter().enumerate() {
			if i != j {
				numerator = numerator * xj;
				denominator = denominator * (xj - xi);
			}
		}
		result = result + yi * (numerator / denominator);
	}
	result
}
