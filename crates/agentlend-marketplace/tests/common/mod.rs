#![allow(dead_code)]

use std::sync::Arc;

use agentlend_marketplace::{AccountRef, MarketplaceCoordinator, ProtocolConfig};
use agentlend_types::{AgentId, Amount, LenderId, ManualClock, OperatorId, Principal};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub struct Market {
    pub market: MarketplaceCoordinator,
    pub clock: ManualClock,
    pub owner: Principal,
}

pub struct Borrower {
    pub agent: AgentId,
    pub principal: Principal,
}

pub struct Lender {
    pub lender: LenderId,
    pub principal: Principal,
}

impl Market {
    pub fn new(config: ProtocolConfig) -> Self {
        init_tracing();
        let clock = ManualClock::starting_now();
        let owner = Principal::operator(OperatorId::new());
        let market =
            MarketplaceCoordinator::with_clock(owner.clone(), config, Arc::new(clock.clone()))
                .expect("valid config");
        Self { market, clock, owner }
    }

    /// Registered agent with reputation, an empty pool and `wallet` units of funds
    pub async fn borrower(&self, wallet: u64) -> Borrower {
        let agent = AgentId::new();
        let principal = Principal::agent(agent.clone());
        self.market.register_agent(&principal, &agent).await.unwrap();
        self.market.initialize_reputation(&principal, &agent).await.unwrap();
        self.market.create_pool(&principal, &agent).await.unwrap();
        if wallet > 0 {
            self.market
                .deposit_funds(&principal, AccountRef::Agent(agent.clone()), Amount::units(wallet))
                .await
                .unwrap();
        }
        Borrower { agent, principal }
    }

    /// A lender that has supplied `units` into `pool`
    pub async fn lender(&self, pool: &AgentId, units: u64) -> Lender {
        let lender = LenderId::new();
        let principal = Principal::lender(lender.clone());
        self.market
            .deposit_funds(&principal, AccountRef::Lender(lender.clone()), Amount::units(units))
            .await
            .unwrap();
        self.market
            .supply_liquidity(&principal, pool, &lender, Amount::units(units))
            .await
            .unwrap();
        Lender { lender, principal }
    }
}
