//! Copy-on-write transition buffer.
//!
//! A transition wraps an immutable base state. Each component has a lazy
//! prime slot materialised by a deep clone on first mutation; reads fall
//! through to the base until then. `commit` produces the posterior state in
//! one step; dropping the buffer discards every staged change. The Δ map is
//! staged per service: an override of `None` destroys the account at commit.

use std::collections::BTreeMap;

use crate::primitives::{Hash32, ServiceId, TimeSlot, ValidatorKeys};
use crate::state::{
    AccumulatedHistory, CoreAssignment, DisputesRecord, Entropy, Privileges, ReadyQueue,
    RecentHistory, SafroleState, ServiceAccount, State, Statistics,
};

pub struct Transition<'a> {
    base: &'a State,
    prime_alpha: Option<Vec<Vec<Hash32>>>,
    prime_phi: Option<Vec<Vec<Hash32>>>,
    prime_beta: Option<RecentHistory>,
    prime_gamma: Option<SafroleState>,
    prime_psi: Option<DisputesRecord>,
    prime_eta: Option<Entropy>,
    prime_iota: Option<Vec<ValidatorKeys>>,
    prime_kappa: Option<Vec<ValidatorKeys>>,
    prime_lambda: Option<Vec<ValidatorKeys>>,
    prime_rho: Option<Vec<Option<CoreAssignment>>>,
    prime_tau: Option<TimeSlot>,
    prime_chi: Option<Privileges>,
    prime_pi: Option<Statistics>,
    prime_theta: Option<ReadyQueue>,
    prime_xi: Option<AccumulatedHistory>,
    delta_overrides: BTreeMap<ServiceId, Option<ServiceAccount>>,
}

macro_rules! cow_component {
    ($field:ident, $prime:ident, $mutator:ident, $ty:ty) => {
        pub fn $field(&self) -> &$ty {
            self.$prime.as_ref().unwrap_or(&self.base.$field)
        }

        /// Clone-on-first-write access to the prime slot.
        pub fn $mutator(&mut self) -> &mut $ty {
            if self.$prime.is_none() {
                self.$prime = Some(self.base.$field.clone());
            }
            self.$prime.as_mut().expect("prime slot was just materialised")
        }
    };
}

impl<'a> Transition<'a> {
    pub fn new(base: &'a State) -> Self {
        Self {
            base,
            prime_alpha: None,
            prime_phi: None,
            prime_beta: None,
            prime_gamma: None,
            prime_psi: None,
            prime_eta: None,
            prime_iota: None,
            prime_kappa: None,
            prime_lambda: None,
            prime_rho: None,
            prime_tau: None,
            prime_chi: None,
            prime_pi: None,
            prime_theta: None,
            prime_xi: None,
            delta_overrides: BTreeMap::new(),
        }
    }

    pub fn base(&self) -> &State {
        self.base
    }

    cow_component!(alpha, prime_alpha, alpha_mut, Vec<Vec<Hash32>>);
    cow_component!(phi, prime_phi, phi_mut, Vec<Vec<Hash32>>);
    cow_component!(beta, prime_beta, beta_mut, RecentHistory);
    cow_component!(gamma, prime_gamma, gamma_mut, SafroleState);
    cow_component!(psi, prime_psi, psi_mut, DisputesRecord);
    cow_component!(eta, prime_eta, eta_mut, Entropy);
    cow_component!(iota, prime_iota, iota_mut, Vec<ValidatorKeys>);
    cow_component!(kappa, prime_kappa, kappa_mut, Vec<ValidatorKeys>);
    cow_component!(lambda, prime_lambda, lambda_mut, Vec<ValidatorKeys>);
    cow_component!(rho, prime_rho, rho_mut, Vec<Option<CoreAssignment>>);
    cow_component!(tau, prime_tau, tau_mut, TimeSlot);
    cow_component!(chi, prime_chi, chi_mut, Privileges);
    cow_component!(pi, prime_pi, pi_mut, Statistics);
    cow_component!(theta, prime_theta, theta_mut, ReadyQueue);
    cow_component!(xi, prime_xi, xi_mut, AccumulatedHistory);

    pub fn account(&self, service: ServiceId) -> Option<&ServiceAccount> {
        match self.delta_overrides.get(&service) {
            Some(staged) => staged.as_ref(),
            None => self.base.delta.get(&service),
        }
    }

    /// Stage the account for mutation, cloning it out of the base on first
    /// touch. Returns `None` for unknown or already-destroyed services.
    pub fn account_mut(&mut self, service: ServiceId) -> Option<&mut ServiceAccount> {
        if !self.delta_overrides.contains_key(&service) {
            let staged = self.base.delta.get(&service)?.clone();
            self.delta_overrides.insert(service, Some(staged));
        }
        self.delta_overrides
            .get_mut(&service)
            .and_then(|staged| staged.as_mut())
    }

    pub fn insert_account(&mut self, service: ServiceId, account: ServiceAccount) {
        self.delta_overrides.insert(service, Some(account));
    }

    pub fn remove_account(&mut self, service: ServiceId) {
        self.delta_overrides.insert(service, None);
    }

    /// Atomically fold every staged prime onto a clone of the base,
    /// producing the posterior state.
    pub fn commit(self) -> State {
        let mut state = self.base.clone();
        if let Some(value) = self.prime_alpha {
            state.alpha = value;
        }
        if let Some(value) = self.prime_phi {
            state.phi = value;
        }
        if let Some(value) = self.prime_beta {
            state.beta = value;
        }
        if let Some(value) = self.prime_gamma {
            state.gamma = value;
        }
        if let Some(value) = self.prime_psi {
            state.psi = value;
        }
        if let Some(value) = self.prime_eta {
            state.eta = value;
        }
        if let Some(value) = self.prime_iota {
            state.iota = value;
        }
        if let Some(value) = self.prime_kappa {
            state.kappa = value;
        }
        if let Some(value) = self.prime_lambda {
            state.lambda = value;
        }
        if let Some(value) = self.prime_rho {
            state.rho = value;
        }
        if let Some(value) = self.prime_tau {
            state.tau = value;
        }
        if let Some(value) = self.prime_chi {
            state.chi = value;
        }
        if let Some(value) = self.prime_pi {
            state.pi = value;
        }
        if let Some(value) = self.prime_theta {
            state.theta = value;
        }
        if let Some(value) = self.prime_xi {
            state.xi = value;
        }
        for (service, staged) in self.delta_overrides {
            match staged {
                Some(account) => {
                    state.delta.insert(service, account);
                }
                None => {
                    state.delta.remove(&service);
                }
            }
        }
        state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::blake2b;
    use crate::params::TINY_PARAMS;
    use crate::state::test_fixtures::genesis_state;

    #[test]
    fn reads_fall_through_until_first_write() {
        let base = genesis_state(&TINY_PARAMS);
        let mut tx = Transition::new(&base);
        assert_eq!(*tx.tau(), 0);
        *tx.tau_mut() = 5;
        assert_eq!(*tx.tau(), 5);
        assert_eq!(base.tau, 0);
    }

    #[test]
    fn commit_applies_only_touched_components() {
        let base = genesis_state(&TINY_PARAMS);
        let mut tx = Transition::new(&base);
        *tx.tau_mut() = 9;
        tx.eta_mut().mix(&blake2b(b"vrf"));
        let posterior = tx.commit();
        assert_eq!(posterior.tau, 9);
        assert_ne!(posterior.eta, base.eta);
        assert_eq!(posterior.kappa, base.kappa);
        assert_eq!(posterior.gamma, base.gamma);
    }

    #[test]
    fn dropping_the_buffer_leaves_base_untouched() {
        let base = genesis_state(&TINY_PARAMS);
        let before = base.clone();
        {
            let mut tx = Transition::new(&base);
            *tx.tau_mut() = 100;
            tx.remove_account(1);
            tx.insert_account(2, ServiceAccount::new(blake2b(b"x"), 1));
            // No commit.
        }
        assert_eq!(base, before);
    }

    #[test]
    fn account_staging_and_destruction() {
        let mut base = genesis_state(&TINY_PARAMS);
        base.delta.insert(7, ServiceAccount::new(blake2b(b"seven"), 70));
        base.delta.insert(8, ServiceAccount::new(blake2b(b"eight"), 80));

        let mut tx = Transition::new(&base);
        tx.account_mut(7).unwrap().balance = 71;
        tx.remove_account(8);
        assert!(tx.account(8).is_none());
        assert!(tx.account_mut(8).is_none());
        assert_eq!(tx.account(7).unwrap().balance, 71);
        // Base still sees the originals.
        assert_eq!(base.delta[&7].balance, 70);

        let posterior = tx.commit();
        assert_eq!(posterior.delta[&7].balance, 71);
        assert!(!posterior.delta.contains_key(&8));
    }

    #[test]
    fn unknown_account_mutation_is_none() {
        let base = genesis_state(&TINY_PARAMS);
        let mut tx = Transition::new(&base);
        assert!(tx.account_mut(404).is_none());
    }
}
