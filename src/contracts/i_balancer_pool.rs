use ethers::prelude::abigen;

// Union of the read accessors exposed across Balancer pool families. Each pool
// type only answers a subset; the decoder picks which ones to call.
abigen!(
    IBalancerPool,
    r#"[
        function totalSupply() external view returns (uint256)
        function getActualSupply() external view returns (uint256)
        function getVirtualSupply() external view returns (uint256)
        function getSwapFeePercentage() external view returns (uint256)
        function getRate() external view returns (uint256)
        function getNormalizedWeights() external view returns (uint256[])
        function getSwapEnabled() external view returns (bool)
        function getAmplificationParameter() external view returns (uint256 value, bool isUpdating, uint256 precision)
        function getTokenRate(address token) external view returns (uint256)
        function getPriceRateCache(address token) external view returns (uint256 rate, uint256 duration, uint256 expires)
        function getTargets() external view returns (uint256 lowerTarget, uint256 upperTarget)
        function getWrappedTokenRate() external view returns (uint256)
        function getMainIndex() external view returns (uint256)
        function getWrappedIndex() external view returns (uint256)
        function getTokenRates() external view returns (uint256 rate0, uint256 rate1)
    ]"#
);
