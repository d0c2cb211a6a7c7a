//! # Bank
//!
//! The classic monitor example: a fixed set of account balances, transfers between them.
//! Every operation runs under the monitor's gate, so no transfer is ever seen half-done
//! and the total only changes through deposits.
//!
//! There's a wait queue per account. A transfer short on money sleeps on the queue of the
//! account it withdraws from, and whatever credits that account signals that queue only.
//! Transfers from other accounts aren't woken for nothing.

use std::thread;

use log::{debug, info};

use crate::{
    config::{Config, GateConfig},
    error::{Error, Result},
    monitor::{Interrupt, Monitor},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferOutcome {
    Completed,
    InsufficientFunds,
}

impl TransferOutcome {
    pub fn is_completed(self) -> bool {
        self == Self::Completed
    }
}

pub struct Bank {
    /// balances, with a wait queue per account index
    monitor: Monitor<Vec<i64>, usize>,
    accounts: usize,
}

impl Bank {
    pub fn new(balances: impl Into<Vec<i64>>) -> Self {
        Self::with_config(balances, &GateConfig::default())
    }

    pub fn with_config(balances: impl Into<Vec<i64>>, config: &GateConfig) -> Self {
        let balances = balances.into();
        Self {
            accounts: balances.len(),
            monitor: Monitor::with_config(balances, config),
        }
    }

    /// The number of accounts never changes, no need to lock for it.
    pub fn accounts(&self) -> usize {
        self.accounts
    }

    fn check_account(&self, account: usize) -> Result<()> {
        if account < self.accounts {
            Ok(())
        } else {
            Err(Error::UnknownAccount {
                account,
                accounts: self.accounts,
            })
        }
    }

    fn check_amount(amount: i64) -> Result<()> {
        if amount < 0 {
            return Err(Error::InvalidAmount(amount));
        }
        Ok(())
    }

    /// Either both balances change or neither does.
    fn move_money(balances: &mut [i64], from: usize, to: usize, amount: i64) -> Result<()> {
        if from == to {
            return Ok(());
        }
        let debited = balances[from].checked_sub(amount).ok_or(Error::Overflow)?;
        let credited = balances[to].checked_add(amount).ok_or(Error::Overflow)?;
        balances[from] = debited;
        balances[to] = credited;
        Ok(())
    }

    fn total(balances: &[i64]) -> Result<i64> {
        balances
            .iter()
            .try_fold(0i64, |total, balance| total.checked_add(*balance))
            .ok_or(Error::Overflow)
    }

    /// Moves the money if `from` has enough right now, fails otherwise. Never waits for money.
    pub fn try_transfer(&self, from: usize, to: usize, amount: i64) -> Result<TransferOutcome> {
        self.check_account(from)?;
        self.check_account(to)?;
        Self::check_amount(amount)?;

        let mut op = self.monitor.begin("try_transfer");
        if op.state()[from] < amount {
            op.finish();
            return Ok(TransferOutcome::InsufficientFunds);
        }

        Self::move_money(op.state_mut(), from, to, amount)?;
        op.signal_all(&to)?;
        op.finish();
        Ok(TransferOutcome::Completed)
    }

    /// Moves the money, waiting for `from` to have enough.
    ///
    /// Only the money already in the bank is waited for: if `amount` is more than the whole
    /// bank holds, the transfer fails right away instead of waiting for deposits.
    pub fn transfer(
        &self,
        from: usize,
        to: usize,
        amount: i64,
        interrupt: &Interrupt,
    ) -> Result<TransferOutcome> {
        self.check_account(from)?;
        self.check_account(to)?;
        Self::check_amount(amount)?;

        let op = self.monitor.begin_interruptible("transfer", interrupt);
        // wide enough to never overflow, this is only a bound
        let total: i128 = op.state().iter().map(|b| i128::from(*b)).sum();
        if i128::from(amount) > total {
            debug!("transfer of {amount} can't be covered, the bank holds {total}");
            op.finish();
            return Ok(TransferOutcome::InsufficientFunds);
        }

        let mut op = op.wait_while(&from, |balances| balances[from] < amount)?;
        if op.waits() > 0 {
            debug!("transfer {from} -> {to} waited {} times", op.waits());
        }

        Self::move_money(op.state_mut(), from, to, amount)?;
        op.signal_all(&to)?;
        op.finish();
        Ok(TransferOutcome::Completed)
    }

    pub fn deposit(&self, account: usize, amount: i64) -> Result<()> {
        self.check_account(account)?;
        Self::check_amount(amount)?;

        let mut op = self.monitor.begin("deposit");
        let balance = &mut op.state_mut()[account];
        *balance = balance.checked_add(amount).ok_or(Error::Overflow)?;
        op.signal_all(&account)?;
        op.finish();
        Ok(())
    }

    pub fn balance(&self, account: usize) -> Result<i64> {
        self.check_account(account)?;
        Ok(self.monitor.lock()[account])
    }

    /// A consistent snapshot of all balances.
    pub fn balances(&self) -> Vec<i64> {
        self.monitor.lock().clone()
    }

    /// The total money in the bank, [Error::Overflow] if it doesn't fit an `i64`.
    pub fn audit(&self) -> Result<i64> {
        let op = self.monitor.begin("audit");
        let total = Self::total(op.state());
        op.finish();
        total
    }

    /// How many transfers are asleep waiting for money on `account`.
    pub fn waiting_on(&self, account: usize) -> Result<usize> {
        self.check_account(account)?;
        Ok(self.monitor.waiting(&account))
    }
}

/// Races two transfers of the whole balance, then makes a transfer wait for a deposit.
pub fn run(config: &Config) {
    let bank = Bank::with_config([100, 0], &config.gate());
    let outcomes: Vec<_> = thread::scope(|s| {
        let handles: Vec<_> = (0..2)
            .map(|_| s.spawn(|| bank.try_transfer(0, 1, 100)))
            .collect();
        handles.into_iter().map(|h| h.join().ok()).collect()
    });
    println!("racing transfers: {outcomes:?}");
    println!("balances after the race: {:?}", bank.balances());

    waiting(config);
}

/// A transfer waits for money that a deposit brings in later.
pub fn waiting(config: &Config) {
    let bank = Bank::with_config([0, 50], &config.gate());
    let interrupt = Interrupt::new();

    thread::scope(|s| {
        let waiter = s.spawn(|| bank.transfer(0, 1, 30, &interrupt));
        while bank.waiting_on(0).unwrap_or_default() == 0 && !waiter.is_finished() {
            thread::yield_now();
        }
        info!("a transfer is waiting for account 0");
        if let Err(e) = bank.deposit(0, 30) {
            println!("deposit failed: {e}");
        }
        match waiter.join() {
            Ok(outcome) => println!("waiting transfer: {outcome:?}"),
            Err(_) => println!("waiting transfer panicked"),
        }
    });

    match bank.audit() {
        Ok(total) => println!("balances: {:?}, total: {total}", bank.balances()),
        Err(e) => println!("balances: {:?}, no total: {e}", bank.balances()),
    }
}

#[cfg(test)]
mod test {
    use std::{
        thread::{scope, sleep},
        time::Duration,
    };

    use super::*;
    use crate::config::Fairness;

    fn wait_for_waiters(bank: &Bank, account: usize, n: usize) {
        while bank.waiting_on(account).unwrap() < n {
            sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn test_racing_transfers() {
        for fairness in [Fairness::Barging, Fairness::Ticket] {
            let config = GateConfig {
                fairness,
                ..GateConfig::default()
            };
            for _ in 0..50 {
                let bank = Bank::with_config([100, 0], &config);
                let outcomes: Vec<_> = scope(|s| {
                    let handles: Vec<_> = (0..2)
                        .map(|_| s.spawn(|| bank.try_transfer(0, 1, 100).unwrap()))
                        .collect();
                    handles.into_iter().map(|h| h.join().unwrap()).collect()
                });

                let completed = outcomes.iter().filter(|o| o.is_completed()).count();
                assert_eq!(completed, 1, "{outcomes:?}");
                assert!(outcomes.contains(&TransferOutcome::InsufficientFunds));
                assert_eq!(bank.balances(), vec![0, 100]);
            }
        }
    }

    #[test]
    fn test_transfer_waits_for_deposit() {
        let bank = Bank::new([50, 0]);
        let interrupt = Interrupt::new();

        scope(|s| {
            let waiter = s.spawn(|| bank.transfer(0, 1, 100, &interrupt));
            wait_for_waiters(&bank, 0, 1);

            // still short after the first deposit, goes back to sleep
            bank.deposit(0, 20).unwrap();
            sleep(Duration::from_millis(20));
            assert!(!waiter.is_finished());
            assert_eq!(bank.balances(), vec![70, 0]);

            bank.deposit(0, 30).unwrap();
            assert_eq!(waiter.join().unwrap(), Ok(TransferOutcome::Completed));
        });

        // moved exactly once
        assert_eq!(bank.balances(), vec![0, 100]);
        assert_eq!(bank.waiting_on(0), Ok(0));
    }

    #[test]
    fn test_transfer_chain() {
        // 2 waits for money from 1, which waits for money from 0
        let bank = Bank::new([0, 0, 0, 10]);
        let interrupt = Interrupt::new();

        scope(|s| {
            let second = s.spawn(|| bank.transfer(1, 2, 10, &interrupt));
            let first = s.spawn(|| bank.transfer(0, 1, 10, &interrupt));
            wait_for_waiters(&bank, 0, 1);
            wait_for_waiters(&bank, 1, 1);

            bank.try_transfer(3, 0, 10).unwrap();
            assert_eq!(first.join().unwrap(), Ok(TransferOutcome::Completed));
            assert_eq!(second.join().unwrap(), Ok(TransferOutcome::Completed));
        });

        assert_eq!(bank.balances(), vec![0, 0, 10, 0]);
    }

    #[test]
    fn test_unreachable_amount_fails_without_waiting() {
        let bank = Bank::new([10, 20]);
        let outcome = bank.transfer(0, 1, 31, &Interrupt::new()).unwrap();
        assert_eq!(outcome, TransferOutcome::InsufficientFunds);
        assert_eq!(bank.balances(), vec![10, 20]);
    }

    #[test]
    fn test_interrupted_transfer() {
        let bank = Bank::new([0, 50]);
        let interrupt = Interrupt::new();

        scope(|s| {
            let waiter = s.spawn(|| bank.transfer(0, 1, 10, &interrupt));
            wait_for_waiters(&bank, 0, 1);
            interrupt.interrupt();
            assert_eq!(waiter.join().unwrap(), Err(Error::Interrupted));
        });

        assert_eq!(bank.balances(), vec![0, 50]);
        assert_eq!(bank.waiting_on(0), Ok(0));
        // the bank still works
        assert_eq!(bank.try_transfer(1, 0, 50), Ok(TransferOutcome::Completed));
    }

    #[test]
    fn test_validation() {
        let bank = Bank::new([10]);
        assert_eq!(
            bank.try_transfer(0, 1, 1),
            Err(Error::UnknownAccount {
                account: 1,
                accounts: 1
            })
        );
        assert_eq!(bank.deposit(0, -5), Err(Error::InvalidAmount(-5)));
        assert_eq!(bank.balance(3), Err(Error::UnknownAccount { account: 3, accounts: 1 }));
        assert_eq!(bank.try_transfer(0, 0, 10), Ok(TransferOutcome::Completed));
        assert_eq!(bank.balance(0), Ok(10));
    }

    #[test]
    fn test_audit_sees_no_half_transfers() {
        let bank = Bank::new(vec![1000; 4]);
        scope(|s| {
            for from in 0..4 {
                let bank = &bank;
                s.spawn(move || {
                    for i in 0..500 {
                        let _ = bank.try_transfer(from, (from + i) % 4, (i % 7) as i64);
                    }
                });
            }
            s.spawn(|| {
                for _ in 0..500 {
                    assert_eq!(bank.audit(), Ok(4000));
                }
            });
        });
        assert_eq!(bank.audit(), Ok(4000));
        assert!(bank.balances().iter().all(|b| *b >= 0));
    }

    #[test]
    fn test_overflow_is_rejected_without_changes() {
        let bank = Bank::new([1]);
        assert_eq!(bank.deposit(0, i64::MAX), Err(Error::Overflow));
        assert_eq!(bank.balance(0), Ok(1));

        let bank = Bank::new([i64::MAX, 1]);
        assert_eq!(bank.audit(), Err(Error::Overflow));
        assert_eq!(bank.try_transfer(1, 0, 1), Err(Error::Overflow));
        assert_eq!(
            bank.transfer(1, 0, 1, &Interrupt::new()),
            Err(Error::Overflow)
        );
        assert_eq!(bank.balances(), vec![i64::MAX, 1]);

        // the failed operations let go of the gate
        assert_eq!(bank.try_transfer(0, 1, 1), Ok(TransferOutcome::Completed));
        assert_eq!(bank.balances(), vec![i64::MAX - 1, 2]);
        assert_eq!(bank.audit(), Err(Error::Overflow));
    }

    #[test]
    fn test_shared_interrupt_cancels_every_waiting_transfer() {
        let bank = Bank::new([0, 0, 100]);
        let interrupt = Interrupt::new();

        scope(|s| {
            let a = s.spawn(|| bank.transfer(0, 2, 10, &interrupt));
            let b = s.spawn(|| bank.transfer(1, 2, 10, &interrupt));
            wait_for_waiters(&bank, 0, 1);
            wait_for_waiters(&bank, 1, 1);

            interrupt.interrupt();
            assert_eq!(a.join().unwrap(), Err(Error::Interrupted));
            assert_eq!(b.join().unwrap(), Err(Error::Interrupted));
        });

        assert!(!interrupt.is_pending());
        assert_eq!(bank.balances(), vec![0, 0, 100]);
        assert_eq!(bank.waiting_on(0), Ok(0));
        assert_eq!(bank.waiting_on(1), Ok(0));
    }
}
