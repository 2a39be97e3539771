//! The rule planner turns each analysed rule into a `RulePlan`: a data-level
//! description of its nested-loop join that the engine interprets.
//!
//! Planning works through the body in declared order:
//! 1.  Every positive atom becomes a `Scan`, whose term patterns either bind a
//!     fresh variable slot, check an already bound one, or match a constant or
//!     functor pattern.
//! 2.  Negated atoms and assignments are deferred until all variables they
//!     read are bound, then scheduled immediately.
//! 3.  The head becomes either a `Produce` action or, when its last term is an
//!     aggregation, an `Aggregate` action over the group-by terms.

use std::collections::HashMap;

use itertools::Itertools;
use log::{debug, trace};

use crate::{
    analysis::{AnalysisResult, FunctorId, PredId, Registry},
    lang::{Aggregator, Atom, BinOp, Const, Literal, Rule, RuleId, Term},
    solver::{error::CompileError, value::Datum},
};

/// How one term of a scanned atom is matched against a tuple's value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pattern {
    Bind(usize),
    Check(usize),
    Const(Datum),
    /// An arithmetic term over already bound variables.
    Eval(Expr),
    Functor {
        functor: FunctorId,
        args: Vec<Pattern>,
    },
}

/// A value computed from bound slots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
    Slot(usize),
    Const(Datum),
    Binary(BinOp, Box<Expr>, Box<Expr>),
    Functor(FunctorId, Vec<Expr>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    Scan {
        position: usize,
        pred: PredId,
        patterns: Vec<Pattern>,
    },
    Negate {
        position: usize,
        pred: PredId,
        terms: Vec<Expr>,
    },
    Assign {
        position: usize,
        slot: usize,
        expr: Expr,
    },
    /// A constant `false` literal: the body never holds.
    Fail { position: usize },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeadAction {
    Produce {
        pred: PredId,
        terms: Vec<Expr>,
    },
    Aggregate {
        pred: PredId,
        group_by: Vec<Expr>,
        aggregator: Aggregator,
        aggregand: Expr,
    },
}

impl HeadAction {
    pub fn pred(&self) -> PredId {
        match self {
            HeadAction::Produce { pred, .. } | HeadAction::Aggregate { pred, .. } => *pred,
        }
    }
}

/// Executable form of one rule.
#[derive(Debug, Clone)]
pub struct RulePlan {
    pub rule: RuleId,
    pub steps: Vec<Step>,
    pub head: HeadAction,
    /// Variable name of every slot, in binding order.
    pub slots: Vec<String>,
    /// Body-less rule whose head is asserted as a fact.
    pub is_fact: bool,
}

impl RulePlan {
    /// Body positions of the positive atoms and the predicates they scan.
    pub fn scans(&self) -> impl Iterator<Item = (usize, PredId)> + '_ {
        self.steps.iter().filter_map(|step| match step {
            Step::Scan { position, pred, .. } => Some((*position, *pred)),
            _ => None,
        })
    }

    pub fn has_scans(&self) -> bool {
        self.scans().next().is_some()
    }
}

/// Plans every rule of an analysed program, indexed by `RuleId`.
pub fn plan_program(analysis: &AnalysisResult) -> Result<Vec<RulePlan>, CompileError> {
    let registry = analysis.registry();
    let mut plans = Vec::with_capacity(analysis.program().rules.len());
    for (id, rule) in analysis.program().rules_with_ids() {
        let plan = RuleCompiler::new(registry, id).compile(rule)?;
        debug!(
            "Planned {} ({} steps, slots [{}])",
            id,
            plan.steps.len(),
            plan.slots.iter().join(", ")
        );
        trace!("  {:?}", plan);
        plans.push(plan);
    }
    Ok(plans)
}

struct RuleCompiler<'a> {
    registry: &'a Registry,
    rule: RuleId,
    slots: Vec<String>,
    slot_of: HashMap<String, usize>,
}

impl<'a> RuleCompiler<'a> {
    fn new(registry: &'a Registry, rule: RuleId) -> Self {
        Self {
            registry,
            rule,
            slots: Vec::new(),
            slot_of: HashMap::new(),
        }
    }

    fn compile(mut self, rule: &Rule) -> Result<RulePlan, CompileError> {
        let is_fact = rule.body.is_empty();
        if is_fact {
            let mut vars = Vec::new();
            rule.head.terms.iter().for_each(|t| t.collect_vars(&mut vars));
            if !vars.is_empty() || rule.aggregates() {
                return Err(CompileError::NonGroundFact { rule: self.rule });
            }
        }

        let steps = self.compile_body(&rule.body)?;
        let head = self.compile_head(&rule.head)?;
        Ok(RulePlan {
            rule: self.rule,
            steps,
            head,
            slots: self.slots,
            is_fact,
        })
    }

    fn compile_body(&mut self, body: &[Literal]) -> Result<Vec<Step>, CompileError> {
        let mut steps = Vec::new();
        let mut deferred: Vec<(usize, &Literal)> = Vec::new();

        for (position, literal) in body.iter().enumerate() {
            match literal {
                Literal::Atom(atom) => {
                    let pred = self.pred_id(&atom.pred)?;
                    let patterns = atom
                        .terms
                        .iter()
                        .map(|t| self.compile_pattern(t))
                        .collect::<Result<_, _>>()?;
                    steps.push(Step::Scan {
                        position,
                        pred,
                        patterns,
                    });
                }
                Literal::Neg(_) => deferred.push((position, literal)),
                Literal::Assign(assign) => {
                    if assign.operator != "=" {
                        return Err(CompileError::UnsupportedOperator {
                            rule: self.rule,
                            operator: assign.operator.clone(),
                        });
                    }
                    if !matches!(assign.target, Term::Var(_)) {
                        return Err(CompileError::UnsupportedTerm {
                            rule: self.rule,
                            term: assign.target.to_string(),
                            context: "assignment target",
                        });
                    }
                    deferred.push((position, literal));
                }
                Literal::App(app) => trace!("{}: application {} is not evaluated", self.rule, app),
                Literal::Lit(Const::Bool(false)) => steps.push(Step::Fail { position }),
                Literal::Lit(_) => {}
            }
            self.schedule(&mut deferred, &mut steps)?;
        }

        if let Some((_, literal)) = deferred.first() {
            let var = self
                .unbound_vars(literal)
                .into_iter()
                .next()
                .unwrap_or_default();
            return Err(CompileError::UnboundVariable {
                rule: self.rule,
                var,
            });
        }
        Ok(steps)
    }

    /// Emits every deferred literal whose inputs are bound, in declared order.
    fn schedule(
        &mut self,
        deferred: &mut Vec<(usize, &Literal)>,
        steps: &mut Vec<Step>,
    ) -> Result<(), CompileError> {
        while let Some(i) = deferred
            .iter()
            .position(|(_, lit)| self.unbound_vars(lit).is_empty())
        {
            let (position, literal) = deferred.remove(i);
            match literal {
                Literal::Neg(atom) => {
                    let pred = self.pred_id(&atom.pred)?;
                    let terms = atom
                        .terms
                        .iter()
                        .map(|t| self.compile_expr(t))
                        .collect::<Result<_, _>>()?;
                    steps.push(Step::Negate {
                        position,
                        pred,
                        terms,
                    });
                }
                Literal::Assign(assign) => {
                    let Term::Var(var) = &assign.target else {
                        continue;
                    };
                    if self.slot_of.contains_key(var) {
                        return Err(CompileError::AssignToBound {
                            rule: self.rule,
                            var: var.clone(),
                        });
                    }
                    let expr = self.compile_expr(&assign.expr)?;
                    let slot = self.bind(var);
                    steps.push(Step::Assign {
                        position,
                        slot,
                        expr,
                    });
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Variables a deferred literal reads that are not bound yet.
    fn unbound_vars(&self, literal: &Literal) -> Vec<String> {
        let mut vars = Vec::new();
        match literal {
            Literal::Neg(atom) => atom.terms.iter().for_each(|t| t.collect_vars(&mut vars)),
            Literal::Assign(assign) => assign.expr.collect_vars(&mut vars),
            _ => {}
        }
        vars.into_iter()
            .filter(|v| !self.slot_of.contains_key(*v))
            .map(str::to_string)
            .collect()
    }

    fn compile_head(&mut self, head: &Atom) -> Result<HeadAction, CompileError> {
        let pred = self.pred_id(&head.pred)?;
        match head.terms.split_last() {
            Some((Term::Agg(aggregator, aggregand), group_by)) => Ok(HeadAction::Aggregate {
                pred,
                group_by: group_by
                    .iter()
                    .map(|t| self.compile_expr(t))
                    .collect::<Result<_, _>>()?,
                aggregator: *aggregator,
                aggregand: self.compile_expr(aggregand)?,
            }),
            _ => Ok(HeadAction::Produce {
                pred,
                terms: head
                    .terms
                    .iter()
                    .map(|t| self.compile_expr(t))
                    .collect::<Result<_, _>>()?,
            }),
        }
    }

    fn compile_pattern(&mut self, term: &Term) -> Result<Pattern, CompileError> {
        Ok(match term {
            Term::Var(var) => match self.slot_of.get(var) {
                Some(&slot) => Pattern::Check(slot),
                None => Pattern::Bind(self.bind(var)),
            },
            Term::Lit(c) => Pattern::Const(Datum::from(c)),
            Term::Atom(atom) => Pattern::Functor {
                functor: self.functor_id(&atom.pred)?,
                args: atom
                    .terms
                    .iter()
                    .map(|t| self.compile_pattern(t))
                    .collect::<Result<_, _>>()?,
            },
            Term::Bin(..) => Pattern::Eval(self.compile_expr(term)?),
            Term::Agg(..) => return Err(CompileError::MisplacedAggregate { rule: self.rule }),
        })
    }

    fn compile_expr(&self, term: &Term) -> Result<Expr, CompileError> {
        Ok(match term {
            Term::Var(var) => match self.slot_of.get(var) {
                Some(&slot) => Expr::Slot(slot),
                None => {
                    return Err(CompileError::UnboundVariable {
                        rule: self.rule,
                        var: var.clone(),
                    })
                }
            },
            Term::Lit(c) => Expr::Const(Datum::from(c)),
            Term::Atom(atom) => Expr::Functor(
                self.functor_id(&atom.pred)?,
                atom.terms
                    .iter()
                    .map(|t| self.compile_expr(t))
                    .collect::<Result<_, _>>()?,
            ),
            Term::Bin(op, l, r) => Expr::Binary(
                *op,
                Box::new(self.compile_expr(l)?),
                Box::new(self.compile_expr(r)?),
            ),
            Term::Agg(..) => return Err(CompileError::MisplacedAggregate { rule: self.rule }),
        })
    }

    fn bind(&mut self, var: &str) -> usize {
        let slot = self.slots.len();
        self.slots.push(var.to_string());
        self.slot_of.insert(var.to_string(), slot);
        slot
    }

    fn pred_id(&self, name: &str) -> Result<PredId, CompileError> {
        self.registry
            .pred_id(name)
            .ok_or_else(|| CompileError::UnknownName {
                rule: self.rule,
                name: name.to_string(),
            })
    }

    fn functor_id(&self, name: &str) -> Result<FunctorId, CompileError> {
        self.registry
            .functor_id(name)
            .ok_or_else(|| CompileError::UnknownName {
                rule: self.rule,
                name: name.to_string(),
            })
    }
}
