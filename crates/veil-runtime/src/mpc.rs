//! Descriptors of off-chain MPC computations
//!
//! The compiler never executes an `mpc function`. It emits an [`MpcDescriptor`]
//! that the computing parties evaluate over secret shares, and an on-chain stub
//! that accepts the resulting outputs together with a correctness proof.

use alloy_primitives::{keccak256, B256, U256};
use serde::{Deserialize, Serialize};

use crate::error::Result;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MpcInput {
    pub name: String,
    /// Canonical element type, e.g. `uint256`
    pub ty: String,
    pub is_array: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MpcOperand {
    /// A named input or local variable
    Var(String),
    /// A temporary produced by an earlier operation
    Temp(u32),
    Const(U256),
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LogicOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MpcOp {
    /// Arithmetic, evaluated over shares when `secret` is set
    Arith { dst: u32, op: ArithOp, lhs: MpcOperand, rhs: MpcOperand, secret: bool },
    /// Comparison or logic over public values only
    Logic { dst: u32, op: LogicOp, lhs: MpcOperand, rhs: MpcOperand },
    Not { dst: u32, operand: MpcOperand },
    /// `array[index]` with a public index
    Element { dst: u32, array: String, index: MpcOperand, secret: bool },
    Length { dst: u32, array: String },
    Assign { var: String, value: MpcOperand, secret: bool },
    /// Opens a secret value. `point` numbers the reveal site in source order.
    Reveal { dst: u32, value: MpcOperand, point: u32 },
    Branch { condition: MpcOperand, then_ops: Vec<MpcOp>, else_ops: Vec<MpcOp> },
    /// `condition_ops` are re-evaluated before every iteration
    Loop { condition_ops: Vec<MpcOp>, condition: MpcOperand, body: Vec<MpcOp> },
    Require { condition: MpcOperand },
    Output { values: Vec<MpcOperand> },
}

impl MpcOp {
    /// Reveal points in execution order of a single pass (loop bodies once)
    pub fn reveal_points(ops: &[MpcOp]) -> Vec<u32> {
        let mut points = Vec::new();
        collect_reveals(ops, &mut points);
        points
    }
}

fn collect_reveals(ops: &[MpcOp], points: &mut Vec<u32>) {
    for op in ops {
        match op {
            MpcOp::Reveal { point, .. } => points.push(*point),
            MpcOp::Branch { then_ops, else_ops, .. } => {
                collect_reveals(then_ops, points);
                collect_reveals(else_ops, points);
            }
            MpcOp::Loop { condition_ops, body, .. } => {
                collect_reveals(condition_ops, points);
                collect_reveals(body, points);
            }
            _ => {}
        }
    }
}

/// Off-chain computation description for one `mpc function`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MpcDescriptor {
    pub name: String,
    pub secret_inputs: Vec<MpcInput>,
    pub public_inputs: Vec<MpcInput>,
    pub operations: Vec<MpcOp>,
    /// Canonical types of the output tuple
    pub outputs: Vec<String>,
    /// Number of static reveal sites
    pub reveal_sites: u32,
}

impl MpcDescriptor {
    pub fn canonical_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Identifier the MPC verifier uses to bind a proof to this computation
    pub fn id(&self) -> Result<B256> {
        Ok(keccak256(self.canonical_json()?.as_bytes()))
    }
}
